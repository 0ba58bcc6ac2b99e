//! Firebase Realtime Database relay store.
//!
//! Talks plain REST: `PUT` replaces, `PATCH` merges, `POST` appends under a
//! server-generated push id. Subscriptions poll the watched path and hand
//! the full payload to the feed on every round, which is exactly the
//! at-least-once full-snapshot contract the watcher is built for.

use super::store::{RelayStore, SnapshotFeed, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default polling interval for subscriptions.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

pub struct FirebaseRelayStore {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl FirebaseRelayStore {
    /// `base_url` is the database root, e.g.
    /// `https://example-default-rtdb.firebaseio.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_poll_interval(base_url, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(base_url: impl Into<String>, poll_interval: Duration) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            poll_interval,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(StoreError::Request(format!("HTTP {status}")))
        }
    }
}

#[async_trait]
impl RelayStore for FirebaseRelayStore {
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&value)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::BadPayload(e.to_string()))?;
        body.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::BadPayload("push response missing entry id".into()))
    }

    async fn subscribe(&self, path: &str) -> Result<SnapshotFeed, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.url(path);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;

                let snapshot = match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        match response.json::<Value>().await {
                            Ok(value) => value,
                            Err(e) => {
                                tracing::debug!("snapshot decode failed: {}", e);
                                continue;
                            }
                        }
                    }
                    Ok(response) => {
                        tracing::debug!("snapshot poll returned HTTP {}", response.status());
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!("snapshot poll failed: {}", e);
                        continue;
                    }
                };

                // Feed dropped means unsubscribed.
                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Ok(SnapshotFeed::new(rx))
    }
}

impl std::fmt::Debug for FirebaseRelayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseRelayStore")
            .field("base_url", &self.base_url)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building() {
        let store = FirebaseRelayStore::new("https://db.example.com/");
        assert_eq!(
            store.url("videocall/s1/offer"),
            "https://db.example.com/videocall/s1/offer.json"
        );
        assert_eq!(store.url("videocall"), "https://db.example.com/videocall.json");
    }
}
