//! Transport capability seam.
//!
//! The peer-to-peer media engine is a black box behind these traits. One
//! transport is created per attempt; it reports discovered candidates,
//! connection state and remote tracks over a broadcast channel, the same
//! way the engine itself publishes call events.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use super::media::{LocalMediaHandle, MediaKind};
use crate::config::IceServerConfig;
use crate::signaling::{IceCandidate, SessionDescription};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),

    #[error("description exchange failed: {0}")]
    Description(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),
}

// ============================================================================
// EVENTS
// ============================================================================

/// Locally-observed connection state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States that terminate the attempt from the transport's side.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was discovered and should be published immediately.
    Candidate(IceCandidate),
    StateChanged(TransportState),
    /// The remote peer's media started arriving.
    RemoteTrack { kind: MediaKind },
}

// ============================================================================
// TRAITS
// ============================================================================

/// One attempt's peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Attaches the local tracks and adds a receive-only line for every
    /// media kind the handle does not carry.
    async fn attach_media(&self, media: &LocalMediaHandle) -> Result<(), TransportError>;

    /// Produces the local offer and applies it as local description.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Produces the local answer and applies it as local description.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Only valid after this side's remote description has been applied;
    /// callers enforce that gate.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn close(&self);

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Builds one transport per attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
