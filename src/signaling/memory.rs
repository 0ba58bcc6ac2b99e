//! In-process relay store.
//!
//! Backs tests and single-process loopback setups with the same contract the
//! hosted store provides: every mutation re-broadcasts the full snapshot of
//! each subscribed path, and `redeliver` forces the duplicate deliveries an
//! at-least-once feed is allowed to produce.

use super::store::{RelayStore, SnapshotFeed, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Value>,
}

/// Relay store held entirely in memory.
pub struct MemoryRelayStore {
    root: Mutex<Value>,
    subscribers: Mutex<Vec<Subscriber>>,
    push_counter: AtomicU64,
}

impl MemoryRelayStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            subscribers: Mutex::new(Vec::new()),
            push_counter: AtomicU64::new(1),
        }
    }

    /// Re-sends the current snapshot to every subscriber without any
    /// mutation, simulating the feed's at-least-once redelivery.
    pub fn redeliver(&self) {
        self.broadcast();
    }

    /// Current value at `path` (tests use this to assert wire contents).
    pub fn value_at(&self, path: &str) -> Value {
        let root = self.root.lock();
        Self::lookup(&root, path).cloned().unwrap_or(Value::Null)
    }

    fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
        let mut node = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    /// Walks to the object at `path`, creating intermediate objects.
    fn lookup_or_create<'a>(root: &'a mut Value, path: &str) -> &'a mut Value {
        let mut node = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = node
                .as_object_mut()
                .unwrap()
                .entry(segment.to_string())
                .or_insert(Value::Object(Map::new()));
        }
        node
    }

    fn broadcast(&self) {
        let root = self.root.lock();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            let snapshot = Self::lookup(&root, &sub.path)
                .cloned()
                .unwrap_or(Value::Null);
            sub.tx.send(snapshot).is_ok()
        });
    }
}

impl Default for MemoryRelayStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        {
            let mut root = self.root.lock();
            *Self::lookup_or_create(&mut root, path) = value;
        }
        self.broadcast();
        Ok(())
    }

    async fn update(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let patch = value
            .as_object()
            .ok_or_else(|| StoreError::BadPayload("update patch must be an object".into()))?
            .clone();
        {
            let mut root = self.root.lock();
            let node = Self::lookup_or_create(&mut root, path);
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let obj = node.as_object_mut().unwrap();
            for (key, val) in patch {
                obj.insert(key, val);
            }
        }
        self.broadcast();
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        // Zero-padded counter so ids sort in insertion order, like the
        // hosted store's chronologically sortable push ids.
        let id = format!("c{:012}", self.push_counter.fetch_add(1, Ordering::SeqCst));
        {
            let mut root = self.root.lock();
            let node = Self::lookup_or_create(&mut root, path);
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node.as_object_mut().unwrap().insert(id.clone(), value);
        }
        self.broadcast();
        Ok(id)
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotFeed, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Initial snapshot right away, matching the hosted feed.
        let snapshot = self.value_at(path);
        let _ = tx.send(snapshot);
        self.subscribers.lock().push(Subscriber {
            path: path.to_string(),
            tx,
        });
        Ok(SnapshotFeed::new(rx))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_update_and_push() {
        let store = MemoryRelayStore::new();

        store
            .write("videocall/s1", json!({"caller": "a", "status": "initializing"}))
            .await
            .unwrap();
        store
            .update("videocall/s1", json!({"status": "calling"}))
            .await
            .unwrap();

        let record = store.value_at("videocall/s1");
        assert_eq!(record["caller"], "a");
        assert_eq!(record["status"], "calling");

        let id1 = store
            .push("videocall/s1/caller_candidates", json!({"candidate": "x"}))
            .await
            .unwrap();
        let id2 = store
            .push("videocall/s1/caller_candidates", json!({"candidate": "y"}))
            .await
            .unwrap();
        // Push ids sort in insertion order.
        assert!(id1 < id2);
    }

    #[tokio::test]
    async fn subscription_delivers_full_snapshots() {
        let store = MemoryRelayStore::new();
        let mut feed = store.subscribe("videocall").await.unwrap();

        // Initial snapshot of an empty tree.
        assert_eq!(feed.next().await.unwrap(), Value::Null);

        store
            .write("videocall/s1", json!({"status": "calling"}))
            .await
            .unwrap();
        let snapshot = feed.next().await.unwrap();
        assert_eq!(snapshot["s1"]["status"], "calling");

        // A mutation of one session re-delivers every session.
        store
            .write("videocall/s2", json!({"status": "initializing"}))
            .await
            .unwrap();
        let snapshot = feed.next().await.unwrap();
        assert_eq!(snapshot["s1"]["status"], "calling");
        assert_eq!(snapshot["s2"]["status"], "initializing");

        // Redelivery repeats the current state unchanged.
        store.redeliver();
        let again = feed.next().await.unwrap();
        assert_eq!(again, snapshot);
    }
}
