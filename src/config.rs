//! Client configuration.

use serde::{Deserialize, Serialize};

/// STUN/TURN server entry, optionally with TURN credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Google STUN servers, enough for most direct connections.
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: None,
        credential: None,
    }]
}

/// Which media kinds this device sends. A kind it never sends still gets a
/// receive-only line during negotiation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaProfile {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaProfile {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Identifier of this device in session records.
    pub device_id: String,
    /// Default callee for outgoing calls.
    pub peer_id: String,
    /// Collection path holding session records in the relay store.
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,
    #[serde(default)]
    pub media: MediaProfile,
}

fn default_collection() -> String {
    "videocall".to_string()
}

impl CallConfig {
    pub fn new(device_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            peer_id: peer_id.into(),
            collection: default_collection(),
            ice_servers: default_ice_servers(),
            media: MediaProfile::default(),
        }
    }

    /// Adds a TURN server with credentials.
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(IceServerConfig {
            urls: vec![url],
            username: Some(username),
            credential: Some(credential),
        });
        self
    }

    pub(crate) fn session_path(&self, session_id: &str) -> String {
        format!("{}/{}", self.collection, session_id)
    }
}
