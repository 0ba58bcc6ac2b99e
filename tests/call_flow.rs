//! End-to-end call flows over an in-memory relay store.
//!
//! Two clients — a caller and a callee — share one `MemoryRelayStore` and a
//! scripted transport, so every test exercises the real watcher loop, the
//! negotiation controller, the candidate relay and teardown, without any
//! network or capture hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use relaycall::call_engine::{
    LocalMediaHandle, MediaError, MediaKind, MediaSource, MediaTrack, PeerTransport,
    TransportError, TransportEvent, TransportFactory, TransportState,
};
use relaycall::signaling::{
    IceCandidate, MemoryRelayStore, RelayStore, SessionDescription, SessionRecord,
};
use relaycall::{CallClient, CallConfig, CallError, CallEvent, EndReason, IceServerConfig};

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    added_candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            events,
            remote_descriptions: Mutex::new(Vec::new()),
            added_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn remote_description_count(&self) -> usize {
        self.remote_descriptions.lock().len()
    }

    fn added_candidates(&self) -> Vec<IceCandidate> {
        self.added_candidates.lock().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn attach_media(&self, _media: &LocalMediaHandle) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0 scripted offer".into()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("v=0 scripted answer".into()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.remote_descriptions.lock().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.added_candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
struct MockFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.created.lock()[index])
    }

    fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = MockTransport::new();
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

struct DetachedMedia;

#[async_trait]
impl MediaSource for DetachedMedia {
    async fn open(
        &self,
        profile: relaycall::MediaProfile,
    ) -> Result<LocalMediaHandle, MediaError> {
        let mut tracks = Vec::new();
        if profile.audio {
            tracks.push(MediaTrack::detached(MediaKind::Audio));
        }
        if profile.video {
            tracks.push(MediaTrack::detached(MediaKind::Video));
        }
        Ok(LocalMediaHandle::new(tracks))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Peer {
    client: Arc<CallClient>,
    factory: Arc<MockFactory>,
    events: broadcast::Receiver<CallEvent>,
}

async fn peer(store: &Arc<MemoryRelayStore>, device_id: &str, peer_id: &str) -> Peer {
    let factory = Arc::new(MockFactory::default());
    let client = CallClient::new(
        CallConfig::new(device_id, peer_id),
        Arc::clone(store) as Arc<dyn RelayStore>,
        Arc::clone(&factory) as Arc<dyn TransportFactory>,
        Arc::new(DetachedMedia),
    );
    let events = client.subscribe();
    Arc::clone(&client).run().await.unwrap();
    Peer {
        client,
        factory,
        events,
    }
}

async fn wait_for<T>(
    rx: &mut broadcast::Receiver<CallEvent>,
    mut pick: impl FnMut(CallEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if let Some(out) = pick(event) {
                return out;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2130706431 192.168.1.{} 5000 typ host", n, n),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

/// Drives the handshake to the point where both sides hold the other's
/// description. Returns the session id and both incoming records.
async fn handshake(caller: &mut Peer, callee: &mut Peer) -> String {
    let session_id = caller.client.start_call().await.unwrap();

    let (incoming_id, record) = wait_for(&mut callee.events, |event| match event {
        CallEvent::IncomingCall { session_id, record } => Some((session_id, record)),
        _ => None,
    })
    .await;
    assert_eq!(incoming_id, session_id);

    callee.client.accept_call(&session_id, &record).await.unwrap();

    // Caller applies the answer asynchronously via its watcher loop.
    let caller_transport = caller.factory.transport(0);
    eventually(|| caller_transport.remote_description_count() == 1).await;
    session_id
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn full_handshake_reaches_connected_status() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = handshake(&mut alice, &mut bob).await;

    // The shared record went initializing → calling → connected, and both
    // descriptions are in place.
    let record: SessionRecord =
        serde_json::from_value(store.value_at(&format!("videocall/{}", session_id))).unwrap();
    assert_eq!(record.caller, "alice");
    assert_eq!(record.callee, "bob");
    assert_eq!(record.status, relaycall::SessionStatus::Connected);
    assert!(record.offer.is_some());
    assert!(record.answer.is_some());

    assert_eq!(bob.factory.transport(0).remote_description_count(), 1);

    // Redelivered snapshots surface nothing new: the answer is applied once
    // and no second incoming-call event fires.
    store.redeliver();
    store.redeliver();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.factory.transport(0).remote_description_count(), 1);
    while let Ok(event) = bob.events.try_recv() {
        assert!(!matches!(event, CallEvent::IncomingCall { .. }));
    }
}

#[tokio::test]
async fn connected_event_fires_once_from_transport_state() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = handshake(&mut alice, &mut bob).await;

    // The optimistic `connected` status alone never produced the event.
    while let Ok(event) = alice.events.try_recv() {
        assert!(!matches!(event, CallEvent::Connected { .. }));
    }

    let transport = alice.factory.transport(0);
    transport.emit(TransportEvent::StateChanged(TransportState::Connected));
    transport.emit(TransportEvent::StateChanged(TransportState::Connected));

    let connected_id = wait_for(&mut alice.events, |event| match event {
        CallEvent::Connected { session_id } => Some(session_id),
        _ => None,
    })
    .await;
    assert_eq!(connected_id, session_id);

    // The duplicate state change surfaces as a state notification only.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut extra_connected = 0;
    while let Ok(event) = alice.events.try_recv() {
        if matches!(event, CallEvent::Connected { .. }) {
            extra_connected += 1;
        }
    }
    assert_eq!(extra_connected, 0);
}

#[tokio::test]
async fn candidates_relay_exactly_once_across_redelivery() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    handshake(&mut alice, &mut bob).await;

    // Bob's transport discovers three candidates; the pump publishes them
    // under callee_candidates and Alice applies each exactly once.
    let bob_transport = bob.factory.transport(0);
    for n in 1..=3 {
        bob_transport.emit(TransportEvent::Candidate(candidate(n)));
    }

    let alice_transport = alice.factory.transport(0);
    eventually(|| alice_transport.added_candidates().len() == 3).await;

    store.redeliver();
    store.redeliver();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let applied = alice_transport.added_candidates();
    assert_eq!(applied.len(), 3);
    // Store push ids sort chronologically, so application order is
    // discovery order.
    assert_eq!(applied[0], candidate(1));
    assert_eq!(applied[2], candidate(3));
}

#[tokio::test]
async fn candidates_published_before_accept_apply_once_the_gate_opens() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = alice.client.start_call().await.unwrap();

    // Alice's transport discovers three candidates while the call is still
    // ringing; they land in caller_candidates ahead of any answer.
    let alice_transport = alice.factory.transport(0);
    for n in 1..=3 {
        alice_transport.emit(TransportEvent::Candidate(candidate(n)));
    }
    eventually(|| {
        store
            .value_at(&format!("videocall/{}/caller_candidates", session_id))
            .as_object()
            .map(|m| m.len())
            == Some(3)
    })
    .await;

    let (incoming_id, record) = wait_for(&mut bob.events, |event| match event {
        CallEvent::IncomingCall { session_id, record } => Some((session_id, record)),
        _ => None,
    })
    .await;
    assert_eq!(incoming_id, session_id);

    // Bob has not joined yet: no transport exists, so nothing was applied.
    assert_eq!(bob.factory.created_count(), 0);

    bob.client.accept_call(&session_id, &record).await.unwrap();

    // The answer write re-broadcasts the snapshot; Bob's now-open gate
    // drains all three in that single pass.
    let bob_transport = bob.factory.transport(0);
    eventually(|| bob_transport.added_candidates().len() == 3).await;

    store.redeliver();
    store.redeliver();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let applied = bob_transport.added_candidates();
    assert_eq!(applied.len(), 3);
    assert_eq!(applied[0], candidate(1));
    assert_eq!(applied[2], candidate(3));
}

#[tokio::test]
async fn local_hangup_ends_both_sides() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = handshake(&mut alice, &mut bob).await;

    alice.client.end_call().await;

    let reason = wait_for(&mut alice.events, |event| match event {
        CallEvent::Ended { reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert_eq!(reason, EndReason::LocalHangup);

    let (bob_session, bob_reason) = wait_for(&mut bob.events, |event| match event {
        CallEvent::Ended { session_id, reason } => Some((session_id, reason)),
        _ => None,
    })
    .await;
    assert_eq!(bob_session, session_id);
    assert_eq!(bob_reason, EndReason::RemoteEnded);

    assert_eq!(store.value_at(&format!("videocall/{}/status", session_id)), "ended");
    eventually(|| alice.factory.transport(0).is_closed()).await;
    eventually(|| bob.factory.transport(0).is_closed()).await;

    // Ending again is a harmless no-op.
    alice.client.end_call().await;
    assert!(matches!(
        alice.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn rejected_call_keeps_its_status() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = alice.client.start_call().await.unwrap();
    let incoming = wait_for(&mut bob.events, |event| match event {
        CallEvent::IncomingCall { session_id, .. } => Some(session_id),
        _ => None,
    })
    .await;

    bob.client.reject_call(&incoming).await.unwrap();

    let reason = wait_for(&mut alice.events, |event| match event {
        CallEvent::Ended { reason, .. } => Some(reason),
        _ => None,
    })
    .await;
    assert_eq!(reason, EndReason::RemoteRejected);

    // The caller's teardown never overwrites the peer's verdict.
    assert_eq!(
        store.value_at(&format!("videocall/{}/status", session_id)),
        "rejected"
    );
}

#[tokio::test]
async fn terminal_record_of_another_session_is_ignored() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    let session_id = handshake(&mut alice, &mut bob).await;

    // A leftover record from some earlier pairing reaches its terminal
    // status; the live call must not notice.
    store
        .write(
            "videocall/stale_1",
            serde_json::json!({
                "caller": "carol", "callee": "dave",
                "status": "ended", "created_at": 0,
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = alice.events.try_recv() {
        assert!(!matches!(event, CallEvent::Ended { .. }));
    }
    assert!(!alice.factory.transport(0).is_closed());
    let _ = session_id;
}

#[tokio::test]
async fn second_start_while_active_is_refused() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    handshake(&mut alice, &mut bob).await;

    assert!(matches!(
        alice.client.start_call().await,
        Err(CallError::AlreadyInCall)
    ));
}

#[tokio::test]
async fn watcher_loop_starts_only_once() {
    let store = Arc::new(MemoryRelayStore::new());
    let alice = peer(&store, "alice", "bob").await;

    // A second loop would carry a fresh incoming-call dedup set and
    // re-notify every already-surfaced call.
    assert!(matches!(
        Arc::clone(&alice.client).run().await,
        Err(CallError::AlreadyRunning)
    ));
}

#[tokio::test]
async fn accept_validates_the_record() {
    let store = Arc::new(MemoryRelayStore::new());
    let bob = peer(&store, "bob", "alice").await;

    // Addressed to someone else.
    let mut record = SessionRecord::new("alice".into(), "carol".into());
    record.offer = Some(SessionDescription::offer("v=0".into()));
    assert!(matches!(
        bob.client.accept_call("s1", &record).await,
        Err(CallError::InvalidRecord(_))
    ));

    // No offer yet.
    let record = SessionRecord::new("alice".into(), "bob".into());
    assert!(matches!(
        bob.client.accept_call("s1", &record).await,
        Err(CallError::InvalidRecord(_))
    ));
}

#[tokio::test]
async fn toggles_require_an_active_call() {
    let store = Arc::new(MemoryRelayStore::new());
    let mut alice = peer(&store, "alice", "bob").await;
    let mut bob = peer(&store, "bob", "alice").await;

    // No call: no track to flip.
    assert!(!alice.client.toggle_audio());
    assert!(!alice.client.toggle_video());

    handshake(&mut alice, &mut bob).await;

    // In a call both kinds exist; the first toggle mutes, the second
    // unmutes and reports the re-enabled state.
    assert!(!alice.client.toggle_audio());
    assert!(alice.client.toggle_audio());
    assert!(!alice.client.toggle_video());
}
