//! Call engine — the per-attempt negotiation machinery.
//!
//! Coordinates one call attempt at a time: the context state machine, the
//! negotiation controller driving description exchange, the candidate relay
//! and the teardown coordinator, all against transport and media seams.
//!

mod candidates;
mod context;
mod media;
mod negotiation;
mod teardown;
mod transport;
mod webrtc;

pub use candidates::CandidateRelay;
pub use context::{CallPhase, CallRole, ContextHandle, FinishedAttempt, LocalCallContext};
pub use media::{LocalMediaHandle, MediaError, MediaKind, MediaSource, MediaTrack};
pub use negotiation::NegotiationController;
pub use teardown::{EndReason, TeardownCoordinator};
pub use transport::{
    PeerTransport, TransportError, TransportEvent, TransportFactory, TransportState,
};
pub use webrtc::{StaticRtpMedia, WebRtcTransport, WebRtcTransportFactory};

use crate::signaling::{SessionRecord, StoreError};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallError {
    #[error("local media error: {0}")]
    Media(#[from] MediaError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("relay store error: {0}")]
    Store(#[from] StoreError),

    #[error("another call is already active")]
    AlreadyInCall,

    #[error("the client's watcher loop is already running")]
    AlreadyRunning,

    #[error("session record not joinable: {0}")]
    InvalidRecord(String),

    #[error("attempt ended before setup completed")]
    Cancelled,
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Notifications surfaced to the host, one tagged channel for all kinds.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A call addressed to this device; pass the record to `accept_call`.
    IncomingCall {
        session_id: String,
        record: SessionRecord,
    },
    /// Local capture is live for the current attempt.
    LocalMediaReady,
    /// The transport confirmed connectivity. Fires exactly once per attempt,
    /// and only from the transport's own state — never from the optimistic
    /// status field in the store.
    Connected { session_id: String },
    /// The attempt is over, for whatever reason. Exactly once per attempt.
    Ended {
        session_id: String,
        reason: EndReason,
    },
    /// The remote peer's media started arriving.
    RemoteStream { kind: MediaKind },
    /// Raw transport connection-state change, for host display.
    ConnectionState(TransportState),
}
