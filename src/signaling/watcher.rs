//! Session collection watcher.
//!
//! The relay store re-delivers the full session collection on every
//! mutation, at least once. The watcher turns each snapshot into discrete
//! signals by diffing against remembered local state; it never assumes a
//! one-shot delta and never writes to the store.

use super::record::{IceCandidate, SessionDescription, SessionRecord, SessionStatus};
use serde_json::Value;
use std::collections::HashSet;

// ============================================================================
// SIGNALS
// ============================================================================

/// Discrete event derived from one snapshot pass.
#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// A call addressed to this device, surfaced once per session id.
    IncomingCall {
        session_id: String,
        record: SessionRecord,
    },
    /// The current session's answer arrived (caller side).
    AnswerReady {
        session_id: String,
        answer: SessionDescription,
    },
    /// The other role's candidate list for the current session. Re-emitted
    /// every snapshot; deduplication is the candidate relay's job.
    RemoteCandidates {
        session_id: String,
        entries: Vec<(String, IceCandidate)>,
    },
    /// The current session reached a terminal status. Repeats are harmless.
    SessionEnded {
        session_id: String,
        status: SessionStatus,
    },
}

/// The slice of attempt state a scan needs, captured under the context lock
/// just before the pass. Handlers still re-validate after every await.
#[derive(Debug, Clone, Default)]
pub struct AttemptView {
    pub session_id: Option<String>,
    pub answer_claimed: bool,
}

// ============================================================================
// WATCHER
// ============================================================================

/// Stateful diff over full snapshots.
///
/// Owns the incoming-call-notified set, which lives exactly as long as the
/// subscription so an already-surfaced call is never re-notified.
pub struct SessionWatcher {
    device_id: String,
    notified_incoming: HashSet<String>,
}

impl SessionWatcher {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            notified_incoming: HashSet::new(),
        }
    }

    /// Derives signals from one full snapshot of the session collection.
    ///
    /// Per record the order is incoming call, answer, candidates, terminal
    /// status, so an answer applied in this pass opens the candidate gate
    /// before the candidates of the same snapshot are handled.
    pub fn scan(&mut self, snapshot: &Value, view: &AttemptView) -> Vec<SessionSignal> {
        let mut signals = Vec::new();
        let Some(sessions) = snapshot.as_object() else {
            return signals;
        };

        for (session_id, raw) in sessions {
            let record: SessionRecord = match serde_json::from_value(raw.clone()) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!("skipping malformed session record {}: {}", session_id, e);
                    continue;
                }
            };

            if record.callee == self.device_id
                && record.status == SessionStatus::Calling
                && record.offer.is_some()
                && !self.notified_incoming.contains(session_id)
            {
                self.notified_incoming.insert(session_id.clone());
                signals.push(SessionSignal::IncomingCall {
                    session_id: session_id.clone(),
                    record: record.clone(),
                });
            }

            // Everything below concerns only the session this device is in.
            if view.session_id.as_deref() != Some(session_id.as_str()) {
                continue;
            }

            if record.caller == self.device_id && !view.answer_claimed {
                if let Some(answer) = &record.answer {
                    signals.push(SessionSignal::AnswerReady {
                        session_id: session_id.clone(),
                        answer: answer.clone(),
                    });
                }
            }

            let remote = record.remote_candidates(&self.device_id);
            if !remote.is_empty() {
                signals.push(SessionSignal::RemoteCandidates {
                    session_id: session_id.clone(),
                    entries: remote
                        .iter()
                        .map(|(id, candidate)| (id.clone(), candidate.clone()))
                        .collect(),
                });
            }

            if record.status.is_terminal() {
                signals.push(SessionSignal::SessionEnded {
                    session_id: session_id.clone(),
                    status: record.status,
                });
            }
        }

        signals
    }
}

// ============================================================================
// TESTS
// ============================================================================
