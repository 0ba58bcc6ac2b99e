//! Signaling module — session records in a shared relay store.
//!
//! This module carries the control plane of a call:
//! - the wire schema both peers read and write
//! - the relay store contract and its Firebase/in-memory implementations
//! - the watcher that turns full snapshots into discrete signals
//!

mod firebase;
mod memory;
mod record;
mod store;
mod watcher;

pub use firebase::{FirebaseRelayStore, DEFAULT_POLL_INTERVAL};
pub use memory::MemoryRelayStore;
pub use record::{
    new_session_id, IceCandidate, SdpType, SessionDescription, SessionRecord, SessionStatus,
};
pub use store::{RelayStore, SnapshotFeed, StoreError};
pub use watcher::{AttemptView, SessionSignal, SessionWatcher};
