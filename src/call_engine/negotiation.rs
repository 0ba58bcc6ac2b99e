//! Description exchange.
//!
//! Drives the offer/answer handshake against the transport capability and
//! publishes the results to the relay store. Caller path: media → transport
//! → offer → publish → (later) apply answer. Callee path: media → transport
//! → apply offer → answer → publish.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::context::{CallPhase, ContextHandle};
use super::media::MediaSource;
use super::transport::{PeerTransport, TransportFactory};
use super::{CallError, CallEvent};
use crate::config::CallConfig;
use crate::signaling::{RelayStore, SessionDescription, SessionStatus};

#[derive(Clone)]
pub struct NegotiationController {
    ctx: ContextHandle,
    store: Arc<dyn RelayStore>,
    factory: Arc<dyn TransportFactory>,
    media_source: Arc<dyn MediaSource>,
    config: CallConfig,
    events: broadcast::Sender<CallEvent>,
}

impl NegotiationController {
    pub fn new(
        ctx: ContextHandle,
        store: Arc<dyn RelayStore>,
        factory: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
        config: CallConfig,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            ctx,
            store,
            factory,
            media_source,
            config,
            events,
        }
    }

    /// Acquires local media, creates the attempt's transport and attaches
    /// the tracks (plus receive-only lines for kinds this role never sends).
    /// If the attempt was torn down while setup was in flight, the fresh
    /// resources are released again and the attempt stays dead.
    pub async fn open_attempt(
        &self,
        session_id: &str,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        let media = Arc::new(self.media_source.open(self.config.media).await?);
        let _ = self.events.send(CallEvent::LocalMediaReady);

        let transport = self.factory.create(&self.config.ice_servers).await?;
        transport.attach_media(&media).await?;

        let installed =
            self.ctx
                .lock()
                .install(session_id, Arc::clone(&transport), Arc::clone(&media));
        if !installed {
            media.stop();
            transport.close().await;
            return Err(CallError::Cancelled);
        }
        Ok(transport)
    }

    /// Caller side: produce the offer and make it visible together with
    /// status `calling` in one merge, so no callee can observe an offer on
    /// a record whose local setup has not succeeded yet.
    pub async fn publish_offer(
        &self,
        session_id: &str,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<(), CallError> {
        let offer = transport.create_offer().await?;
        {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(session_id) {
                return Err(CallError::Cancelled);
            }
            ctx.advance(CallPhase::Negotiating);
        }
        self.store
            .update(
                &self.config.session_path(session_id),
                serde_json::json!({
                    "offer": offer,
                    "status": SessionStatus::Calling,
                }),
            )
            .await?;
        tracing::info!("offer published for {}", session_id);
        Ok(())
    }

    /// Caller side: apply the callee's answer, opening the candidate gate.
    /// A stale session id means teardown won the race; nothing to do.
    pub async fn apply_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), CallError> {
        let Some(transport) = self.ctx.lock().transport_for(session_id) else {
            return Ok(());
        };
        transport.set_remote_description(answer).await?;
        let mut ctx = self.ctx.lock();
        if ctx.mark_remote_applied(session_id) {
            ctx.advance(CallPhase::Connecting);
            tracing::info!("answer applied for {}", session_id);
        }
        Ok(())
    }

    /// Callee side: apply the caller's offer, produce the answer and publish
    /// it together with the optimistic `connected` status. True connectivity
    /// is still confirmed by the transport's own state notification.
    pub async fn accept(
        &self,
        session_id: &str,
        offer: SessionDescription,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<(), CallError> {
        transport.set_remote_description(offer).await?;
        if !self.ctx.lock().mark_remote_applied(session_id) {
            return Err(CallError::Cancelled);
        }

        let answer = transport.create_answer().await?;
        {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(session_id) {
                return Err(CallError::Cancelled);
            }
            ctx.advance(CallPhase::Negotiating);
            ctx.advance(CallPhase::Connecting);
        }
        self.store
            .update(
                &self.config.session_path(session_id),
                serde_json::json!({
                    "answer": answer,
                    "status": SessionStatus::Connected,
                }),
            )
            .await?;
        tracing::info!("answer published for {}", session_id);
        Ok(())
    }
}
