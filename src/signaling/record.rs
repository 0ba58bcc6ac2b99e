//! Wire schema for session records in the relay store.
//!
//! These structures must match byte-for-byte what independently built
//! caller and callee implementations read and write, so every field
//! keeps the exact key names used on the wire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// SESSION STATUS
// ============================================================================

/// Remotely-declared status of a call session.
///
/// Transitions are monotonic: once a record reaches a terminal status it is
/// retired, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Record created, offer not yet visible.
    Initializing,
    /// Offer published, waiting for the callee.
    Calling,
    /// Answer published by the callee. This is an optimistic write; true
    /// connectivity is reported by the transport capability, not this field.
    Connected,
    /// Call torn down by either side.
    Ended,
    /// Callee declined the call.
    Rejected,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Rejected)
    }
}

// ============================================================================
// DESCRIPTIONS AND CANDIDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque negotiation payload, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp,
        }
    }
}

/// A discovered network path, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

// ============================================================================
// SESSION RECORD
// ============================================================================

/// One call attempt's shared record, keyed by session id in the store.
///
/// Created by the caller, mutated in place by both sides. At most one offer
/// and one answer are ever written; the candidate maps only grow. Relay-store
/// push ids sort chronologically, so `BTreeMap` iteration follows store
/// insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub caller: String,
    pub callee: String,
    pub status: SessionStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub caller_candidates: BTreeMap<String, IceCandidate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callee_candidates: BTreeMap<String, IceCandidate>,
}

impl SessionRecord {
    /// Fresh record as written by `start_call`, before any offer exists.
    pub fn new(caller: String, callee: String) -> Self {
        Self {
            caller,
            callee,
            status: SessionStatus::Initializing,
            created_at: chrono::Utc::now().timestamp_millis(),
            offer: None,
            answer: None,
            caller_candidates: BTreeMap::new(),
            callee_candidates: BTreeMap::new(),
        }
    }

    /// The peer's candidate list, decided per record: a device reads only
    /// the list written by the *other* role.
    pub fn remote_candidates(&self, device_id: &str) -> &BTreeMap<String, IceCandidate> {
        if self.caller == device_id {
            &self.callee_candidates
        } else {
            &self.caller_candidates
        }
    }
}

/// Derives a new session id from the device id and the current time.
/// Collisions are accepted, not actively guarded against.
pub fn new_session_id(device_id: &str) -> String {
    format!("{}_{}", device_id, chrono::Utc::now().timestamp_millis())
}

// ============================================================================
// TESTS
// ============================================================================
