//! Public call client.
//!
//! One `CallClient` per device. It owns the watcher loop over the relay
//! store, the attempt context and the engine components, and exposes the
//! host-facing operations: start, accept, reject, end, toggle media.
//! Snapshot signals are handled strictly in order on one task; anything
//! that crosses an await re-validates the session id afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::call_engine::{
    CallError, CallEvent, CallRole, CandidateRelay, ContextHandle, EndReason, LocalCallContext,
    MediaKind, MediaSource, NegotiationController, PeerTransport, TeardownCoordinator,
    TransportEvent, TransportFactory, TransportState,
};
use crate::config::CallConfig;
use crate::signaling::{
    new_session_id, RelayStore, SessionRecord, SessionSignal, SessionWatcher, StoreError,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct CallClient {
    config: CallConfig,
    store: Arc<dyn RelayStore>,
    ctx: ContextHandle,
    negotiation: NegotiationController,
    relay: CandidateRelay,
    teardown: TeardownCoordinator,
    events: broadcast::Sender<CallEvent>,
    started: AtomicBool,
}

impl CallClient {
    pub fn new(
        config: CallConfig,
        store: Arc<dyn RelayStore>,
        factory: Arc<dyn TransportFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> Arc<Self> {
        let ctx = LocalCallContext::handle();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let negotiation = NegotiationController::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            factory,
            media_source,
            config.clone(),
            events.clone(),
        );
        let relay = CandidateRelay::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            config.collection.clone(),
        );
        let teardown = TeardownCoordinator::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            config.collection.clone(),
            events.clone(),
        );

        Arc::new(Self {
            config,
            store,
            ctx,
            negotiation,
            relay,
            teardown,
            events,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Notification stream; subscribe before `run` to not miss early events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // WATCHER LOOP
    // ========================================================================

    /// Subscribes to the session collection and spawns the watcher loop.
    /// Runs at most once per client — a second loop would carry its own
    /// incoming-call dedup set and re-notify calls the first one already
    /// surfaced. The loop ends when the store feed closes.
    pub async fn run(self: Arc<Self>) -> Result<(), CallError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CallError::AlreadyRunning);
        }
        let mut feed = self.store.subscribe(&self.config.collection).await?;
        let client = self;
        tokio::spawn(async move {
            let mut watcher = SessionWatcher::new(client.config.device_id.clone());
            while let Some(snapshot) = feed.next().await {
                let view = client.ctx.lock().attempt_view();
                for signal in watcher.scan(&snapshot, &view) {
                    client.handle_signal(signal).await;
                }
            }
            tracing::info!("session feed closed, watcher stopping");
        });
        Ok(())
    }

    async fn handle_signal(&self, signal: SessionSignal) {
        match signal {
            SessionSignal::IncomingCall { session_id, record } => {
                tracing::info!("incoming call {} from {}", session_id, record.caller);
                let _ = self.events.send(CallEvent::IncomingCall { session_id, record });
            }
            SessionSignal::AnswerReady { session_id, answer } => {
                if !self.ctx.lock().claim_answer(&session_id) {
                    return;
                }
                if let Err(err) = self.negotiation.apply_answer(&session_id, answer).await {
                    tracing::error!("answer for {} not applicable: {}", session_id, err);
                    self.teardown
                        .end_if_current(&session_id, EndReason::Failure(err.to_string()))
                        .await;
                }
            }
            SessionSignal::RemoteCandidates {
                session_id,
                entries,
            } => {
                self.relay.drain(&session_id, entries).await;
            }
            SessionSignal::SessionEnded { session_id, status } => {
                let reason = if status == crate::signaling::SessionStatus::Rejected {
                    EndReason::RemoteRejected
                } else {
                    EndReason::RemoteEnded
                };
                self.teardown.end_if_current(&session_id, reason).await;
            }
        }
    }

    // ========================================================================
    // CALL OPERATIONS
    // ========================================================================

    /// Starts an outgoing call to the configured peer. Returns the new
    /// session id; any setup failure tears the attempt down before the
    /// error is returned.
    pub async fn start_call(&self) -> Result<String, CallError> {
        let session_id = new_session_id(&self.config.device_id);
        if !self
            .ctx
            .lock()
            .begin_attempt(session_id.clone(), CallRole::Caller)
        {
            return Err(CallError::AlreadyInCall);
        }
        tracing::info!("calling {} ({})", self.config.peer_id, session_id);

        match self.drive_caller(&session_id).await {
            Ok(()) => Ok(session_id),
            Err(err) => {
                self.teardown
                    .end_if_current(&session_id, EndReason::Failure(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    async fn drive_caller(&self, session_id: &str) -> Result<(), CallError> {
        let record = SessionRecord::new(
            self.config.device_id.clone(),
            self.config.peer_id.clone(),
        );
        let payload = serde_json::to_value(&record)
            .map_err(|err| CallError::Store(StoreError::BadPayload(err.to_string())))?;
        self.store
            .write(&self.config.session_path(session_id), payload)
            .await?;

        let transport = self.negotiation.open_attempt(session_id).await?;
        self.spawn_transport_pump(session_id.to_string(), Arc::clone(&transport));
        self.negotiation.publish_offer(session_id, &transport).await
    }

    /// Accepts an incoming call previously surfaced as `IncomingCall`.
    pub async fn accept_call(
        &self,
        session_id: &str,
        record: &SessionRecord,
    ) -> Result<(), CallError> {
        if record.callee != self.config.device_id {
            return Err(CallError::InvalidRecord(
                "record addresses another device".into(),
            ));
        }
        if record.status.is_terminal() {
            return Err(CallError::InvalidRecord(
                "session already reached a terminal status".into(),
            ));
        }
        let Some(offer) = record.offer.clone() else {
            return Err(CallError::InvalidRecord("record carries no offer".into()));
        };
        if !self
            .ctx
            .lock()
            .begin_attempt(session_id.to_string(), CallRole::Callee)
        {
            return Err(CallError::AlreadyInCall);
        }
        tracing::info!("accepting call {} from {}", session_id, record.caller);

        let result = async {
            let transport = self.negotiation.open_attempt(session_id).await?;
            self.spawn_transport_pump(session_id.to_string(), Arc::clone(&transport));
            self.negotiation.accept(session_id, offer, &transport).await
        }
        .await;

        if let Err(err) = &result {
            self.teardown
                .end_if_current(session_id, EndReason::Failure(err.to_string()))
                .await;
        }
        result
    }

    /// Declines an incoming call without joining it. The caller observes
    /// the `rejected` status and tears down on its side.
    pub async fn reject_call(&self, session_id: &str) -> Result<(), CallError> {
        tracing::info!("rejecting call {}", session_id);
        self.store
            .update(
                &self.config.session_path(session_id),
                serde_json::json!({ "status": crate::signaling::SessionStatus::Rejected }),
            )
            .await?;
        Ok(())
    }

    /// Hangs up the current call. Safe to call at any time; does nothing
    /// when no call is active.
    pub async fn end_call(&self) {
        self.teardown.end(EndReason::LocalHangup).await;
    }

    /// Flips the audio send state. Returns the new state, or `false`
    /// without any effect when no audio track exists.
    pub fn toggle_audio(&self) -> bool {
        self.toggle(MediaKind::Audio)
    }

    /// Flips the video send state. Returns the new state, or `false`
    /// without any effect when no video track exists.
    pub fn toggle_video(&self) -> bool {
        self.toggle(MediaKind::Video)
    }

    fn toggle(&self, kind: MediaKind) -> bool {
        let media = self.ctx.lock().media();
        match media {
            Some(media) => media.toggle(kind),
            None => false,
        }
    }

    // ========================================================================
    // TRANSPORT EVENTS
    // ========================================================================

    /// Pumps one transport's events for as long as its attempt is current.
    fn spawn_transport_pump(&self, session_id: String, transport: Arc<dyn PeerTransport>) {
        let mut rx = transport.subscribe();
        let ctx = Arc::clone(&self.ctx);
        let relay = self.relay.clone();
        let teardown = self.teardown.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("transport events lagged by {}", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !ctx.lock().is_current(&session_id) {
                    break;
                }
                match event {
                    TransportEvent::Candidate(candidate) => {
                        relay.publish_local(&session_id, candidate).await;
                    }
                    TransportEvent::StateChanged(state) => {
                        let _ = events.send(CallEvent::ConnectionState(state));
                        if state == TransportState::Connected {
                            if ctx.lock().mark_connected(&session_id) {
                                tracing::info!("call {} connected", session_id);
                                let _ = events.send(CallEvent::Connected {
                                    session_id: session_id.clone(),
                                });
                            }
                        } else if state.is_failure() {
                            teardown
                                .end_if_current(
                                    &session_id,
                                    EndReason::Failure(format!("transport {:?}", state)),
                                )
                                .await;
                            break;
                        }
                    }
                    TransportEvent::RemoteTrack { kind } => {
                        let _ = events.send(CallEvent::RemoteStream { kind });
                    }
                }
            }
        });
    }
}
