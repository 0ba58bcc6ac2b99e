//! Call teardown.
//!
//! Every path out of a call funnels through the coordinator: explicit
//! hangup, remote end/reject seen on the record, and transport or setup
//! failures. The context hands the attempt's resources out exactly once,
//! so concurrent ends collapse into one cleanup and one `Ended` event.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::context::{CallPhase, ContextHandle, FinishedAttempt};
use super::CallEvent;
use crate::signaling::{RelayStore, SessionStatus};

/// Why a call attempt finished. Local reasons write the terminal status to
/// the shared record; remote reasons were already written by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteEnded,
    RemoteRejected,
    Failure(String),
}

impl EndReason {
    fn is_local(&self) -> bool {
        matches!(self, EndReason::LocalHangup | EndReason::Failure(_))
    }

    fn terminal_phase(&self) -> CallPhase {
        match self {
            EndReason::LocalHangup | EndReason::RemoteEnded => CallPhase::Ended,
            EndReason::RemoteRejected => CallPhase::Rejected,
            EndReason::Failure(_) => CallPhase::Failed,
        }
    }
}

#[derive(Clone)]
pub struct TeardownCoordinator {
    ctx: ContextHandle,
    store: Arc<dyn RelayStore>,
    collection: String,
    events: broadcast::Sender<CallEvent>,
}

impl TeardownCoordinator {
    pub fn new(
        ctx: ContextHandle,
        store: Arc<dyn RelayStore>,
        collection: String,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            ctx,
            store,
            collection,
            events,
        }
    }

    /// Ends whatever attempt is currently live. No-op when idle or when
    /// another teardown already took the attempt.
    pub async fn end(&self, reason: EndReason) {
        let finished = self.ctx.lock().finish(reason.terminal_phase());
        self.complete(finished, reason).await;
    }

    /// Ends the attempt only if `session_id` is still the live one. Events
    /// observed for an attempt that has since been replaced must not take
    /// down its successor.
    pub async fn end_if_current(&self, session_id: &str, reason: EndReason) {
        let finished = {
            let mut ctx = self.ctx.lock();
            if ctx.is_current(session_id) {
                ctx.finish(reason.terminal_phase())
            } else {
                None
            }
        };
        self.complete(finished, reason).await;
    }

    async fn complete(&self, finished: Option<FinishedAttempt>, reason: EndReason) {
        let Some(attempt) = finished else {
            return;
        };
        tracing::info!(
            "call {} ending as {:?}: {:?}",
            attempt.session_id,
            attempt.role,
            reason
        );

        if let Some(media) = attempt.media {
            media.stop();
        }
        if let Some(transport) = attempt.transport {
            transport.close().await;
        }

        // Remote reasons already carry a terminal status written by the
        // peer; overwriting `rejected` with `ended` would lose it.
        if reason.is_local() {
            let path = format!("{}/{}", self.collection, attempt.session_id);
            let patch = serde_json::json!({ "status": SessionStatus::Ended });
            if let Err(err) = self.store.update(&path, patch).await {
                tracing::warn!(
                    "could not mark session {} ended: {}",
                    attempt.session_id,
                    err
                );
            }
        }

        let _ = self.events.send(CallEvent::Ended {
            session_id: attempt.session_id,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::context::{CallRole, LocalCallContext};
    use crate::signaling::MemoryRelayStore;

    fn coordinator() -> (TeardownCoordinator, ContextHandle, Arc<MemoryRelayStore>) {
        let store = Arc::new(MemoryRelayStore::new());
        let ctx = LocalCallContext::handle();
        let (events, _) = broadcast::channel(16);
        let coordinator = TeardownCoordinator::new(
            Arc::clone(&ctx),
            store.clone() as Arc<dyn RelayStore>,
            "videocall".into(),
            events,
        );
        (coordinator, ctx, store)
    }

    #[tokio::test]
    async fn local_hangup_writes_ended_status() {
        let (coordinator, ctx, store) = coordinator();
        ctx.lock().begin_attempt("s1".into(), CallRole::Caller);

        coordinator.end(EndReason::LocalHangup).await;

        assert_eq!(store.value_at("videocall/s1/status"), "ended");
        assert_eq!(ctx.lock().phase(), CallPhase::Ended);
    }

    #[tokio::test]
    async fn remote_reject_does_not_touch_status() {
        let (coordinator, ctx, store) = coordinator();
        ctx.lock().begin_attempt("s1".into(), CallRole::Caller);

        coordinator.end(EndReason::RemoteRejected).await;

        assert!(store.value_at("videocall/s1/status").is_null());
        assert_eq!(ctx.lock().phase(), CallPhase::Rejected);
    }

    #[tokio::test]
    async fn concurrent_ends_emit_a_single_event() {
        let (coordinator, ctx, _store) = coordinator();
        ctx.lock().begin_attempt("s1".into(), CallRole::Callee);
        let mut rx = coordinator.events.subscribe();

        let a = coordinator.clone();
        let b = coordinator.clone();
        tokio::join!(
            a.end(EndReason::LocalHangup),
            b.end(EndReason::RemoteEnded),
        );

        assert!(matches!(
            rx.try_recv(),
            Ok(CallEvent::Ended { session_id, .. }) if session_id == "s1"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_if_current_ignores_stale_session() {
        let (coordinator, ctx, _store) = coordinator();
        ctx.lock().begin_attempt("s2".into(), CallRole::Caller);

        coordinator
            .end_if_current("s1", EndReason::RemoteEnded)
            .await;

        assert!(ctx.lock().is_current("s2"));
    }

    #[tokio::test]
    async fn end_while_idle_is_a_no_op() {
        let (coordinator, _ctx, store) = coordinator();
        let mut rx = coordinator.events.subscribe();

        coordinator.end(EndReason::LocalHangup).await;

        assert!(rx.try_recv().is_err());
        assert!(store.value_at("videocall").is_null());
    }
}
