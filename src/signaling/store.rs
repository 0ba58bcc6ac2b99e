//! Relay store contract.
//!
//! The store is an externally hosted key-value tree used purely as a
//! signaling side channel. Subscriptions deliver the *full* value of the
//! watched path on every mutation, at least once — there are no incremental
//! diffs, so consumers must diff against remembered local state themselves.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("relay store request failed: {0}")]
    Request(String),

    #[error("relay store returned unexpected payload: {0}")]
    BadPayload(String),
}

// ============================================================================
// SNAPSHOT FEED
// ============================================================================

/// Stream of full snapshots for one subscribed path.
///
/// Dropping the feed unsubscribes; the producer stops once it notices the
/// receiver is gone.
pub struct SnapshotFeed {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl SnapshotFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    /// Next full snapshot, or `None` once the store side has shut down.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

// ============================================================================
// RELAY STORE TRAIT
// ============================================================================

/// Client-side contract of the relay store.
///
/// Paths are slash-separated (`videocall/{session_id}/offer`). No exclusive
/// write access exists anywhere: both peers mutate the same records.
#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Replaces the value at `path`.
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merges `value` into the object at `path`, leaving other keys intact.
    async fn update(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Appends `value` under a store-generated entry id and returns that id.
    /// Generated ids sort chronologically.
    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    /// Subscribes to full-snapshot delivery for `path`.
    async fn subscribe(&self, path: &str) -> Result<SnapshotFeed, StoreError>;
}
