//! ICE candidate relay.
//!
//! Local candidates are appended to the role's list on the session record;
//! remote candidates are gated until the remote description is in place and
//! are marked as seen before they touch the transport, so a redelivered
//! snapshot never applies them twice.

use std::sync::Arc;

use super::context::{CallRole, ContextHandle};
use crate::signaling::{IceCandidate, RelayStore};

#[derive(Clone)]
pub struct CandidateRelay {
    ctx: ContextHandle,
    store: Arc<dyn RelayStore>,
    collection: String,
}

impl CandidateRelay {
    pub fn new(ctx: ContextHandle, store: Arc<dyn RelayStore>, collection: String) -> Self {
        Self {
            ctx,
            store,
            collection,
        }
    }

    /// Appends a locally gathered candidate to this role's list. Publish
    /// failures are logged and swallowed; a lost candidate degrades the
    /// connection, it does not end the call.
    pub async fn publish_local(&self, session_id: &str, candidate: IceCandidate) {
        let role = {
            let ctx = self.ctx.lock();
            if !ctx.is_current(session_id) {
                return;
            }
            ctx.role()
        };
        let list = match role {
            Some(CallRole::Caller) => "caller_candidates",
            Some(CallRole::Callee) => "callee_candidates",
            None => return,
        };
        let path = format!("{}/{}/{}", self.collection, session_id, list);

        let payload = match serde_json::to_value(&candidate) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("could not encode candidate: {}", err);
                return;
            }
        };
        match self.store.push(&path, payload).await {
            Ok(entry_id) => tracing::debug!("candidate {} published for {}", entry_id, session_id),
            Err(err) => tracing::warn!("candidate publish failed for {}: {}", session_id, err),
        }
    }

    /// Applies the unseen remote candidates for the current attempt. Entries
    /// are claimed (marked seen) under the context lock before any transport
    /// call; if the gate is still closed nothing is claimed and the same
    /// entries come back on the next snapshot. A candidate the transport
    /// rejects is logged and skipped.
    pub async fn drain(&self, session_id: &str, entries: Vec<(String, IceCandidate)>) {
        let Some((transport, pending)) = self.ctx.lock().claim_candidates(session_id, entries)
        else {
            return;
        };
        for (entry_id, candidate) in pending {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                tracing::warn!("candidate {} rejected by transport: {}", entry_id, err);
            }
        }
    }
}
