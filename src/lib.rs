//! relaycall — P2P video-call signaling over a shared realtime store.
//!
//! Two devices negotiate a WebRTC call by mutating one session record in a
//! Firebase-RTDB-style store: the caller writes the record and its offer,
//! the callee answers, both append ICE candidates, either side writes the
//! terminal status. The store is the only channel between the peers.
//!
//! - [`signaling`] — wire schema, relay-store backends, snapshot watcher
//! - [`call_engine`] — per-attempt state machine, negotiation, candidates,
//!   teardown, and the WebRTC transport
//! - [`client::CallClient`] — the host-facing API

pub mod call_engine;
pub mod client;
pub mod config;
pub mod signaling;

pub use call_engine::{CallError, CallEvent, EndReason, MediaKind, TransportState};
pub use client::CallClient;
pub use config::{CallConfig, IceServerConfig, MediaProfile};
pub use signaling::{FirebaseRelayStore, MemoryRelayStore, SessionRecord, SessionStatus};

/// Installs the default tracing subscriber. `RUST_LOG` overrides the
/// built-in directives.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaycall=debug".parse().unwrap())
                .add_directive("webrtc=warn".parse().unwrap()),
        )
        .init();
}
