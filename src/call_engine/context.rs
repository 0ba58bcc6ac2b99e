//! Per-attempt call state.
//!
//! One `LocalCallContext` exists per client, recreated for every attempt.
//! It is the only shared mutable resource: handlers lock it briefly, never
//! across an await, and re-validate the session id after every suspension
//! point so an operation that lost a race with teardown no-ops instead of
//! mutating retired state.

use super::media::LocalMediaHandle;
use super::transport::PeerTransport;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// ROLE AND PHASE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Negotiation phase of the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    Initializing,
    Negotiating,
    Connecting,
    Connected,
    Ended,
    Rejected,
    Failed,
}

impl CallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallPhase::Ended | CallPhase::Rejected | CallPhase::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            CallPhase::Idle => 0,
            CallPhase::Initializing => 1,
            CallPhase::Negotiating => 2,
            CallPhase::Connecting => 3,
            CallPhase::Connected => 4,
            CallPhase::Ended | CallPhase::Rejected | CallPhase::Failed => 5,
        }
    }
}

// ============================================================================
// LOCAL CALL CONTEXT
// ============================================================================

/// Resources handed back exactly once when an attempt is finished.
pub struct FinishedAttempt {
    pub session_id: String,
    pub role: CallRole,
    pub transport: Option<Arc<dyn PeerTransport>>,
    pub media: Option<Arc<LocalMediaHandle>>,
}

pub struct LocalCallContext {
    session_id: Option<String>,
    role: Option<CallRole>,
    phase: CallPhase,
    remote_applied: bool,
    answer_claimed: bool,
    connected_fired: bool,
    applied_candidates: HashSet<String>,
    transport: Option<Arc<dyn PeerTransport>>,
    media: Option<Arc<LocalMediaHandle>>,
}

pub type ContextHandle = Arc<parking_lot::Mutex<LocalCallContext>>;

impl LocalCallContext {
    pub fn new() -> Self {
        Self {
            session_id: None,
            role: None,
            phase: CallPhase::Idle,
            remote_applied: false,
            answer_claimed: false,
            connected_fired: false,
            applied_candidates: HashSet::new(),
            transport: None,
            media: None,
        }
    }

    pub fn handle() -> ContextHandle {
        Arc::new(parking_lot::Mutex::new(Self::new()))
    }

    // ========================================================================
    // ATTEMPT LIFECYCLE
    // ========================================================================

    /// Claims the context for a fresh attempt. Fails while a previous
    /// attempt is still live; a terminal phase frees the context for the
    /// next attempt (with a new session id — terminal ids are never reused).
    pub fn begin_attempt(&mut self, session_id: String, role: CallRole) -> bool {
        if self.session_id.is_some() || (self.phase != CallPhase::Idle && !self.phase.is_terminal())
        {
            return false;
        }
        *self = Self::new();
        self.session_id = Some(session_id);
        self.role = Some(role);
        self.phase = CallPhase::Initializing;
        true
    }

    /// Takes the attempt out of the context, exactly once. Concurrent end
    /// calls race on this: the loser gets `None` and must no-op.
    pub fn finish(&mut self, terminal: CallPhase) -> Option<FinishedAttempt> {
        debug_assert!(terminal.is_terminal());
        let session_id = self.session_id.take()?;
        let role = self.role.take().unwrap_or(CallRole::Caller);
        let transport = self.transport.take();
        let media = self.media.take();
        self.applied_candidates.clear();
        self.remote_applied = false;
        self.phase = terminal;
        Some(FinishedAttempt {
            session_id,
            role,
            transport,
            media,
        })
    }

    // ========================================================================
    // GUARDED ACCESS
    // ========================================================================

    pub fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn answer_claimed(&self) -> bool {
        self.answer_claimed
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    /// Moves the phase forward. Regressions and post-terminal moves are
    /// ignored, which keeps transitions monotonic under stale handlers.
    pub fn advance(&mut self, phase: CallPhase) {
        if self.phase.is_terminal() {
            return;
        }
        if phase.rank() > self.phase.rank() {
            self.phase = phase;
        }
    }

    /// Installs the attempt's transport and media once setup succeeded.
    /// Returns false when the attempt was torn down mid-setup.
    pub fn install(
        &mut self,
        session_id: &str,
        transport: Arc<dyn PeerTransport>,
        media: Arc<LocalMediaHandle>,
    ) -> bool {
        if !self.is_current(session_id) {
            return false;
        }
        self.transport = Some(transport);
        self.media = Some(media);
        true
    }

    pub fn transport_for(&self, session_id: &str) -> Option<Arc<dyn PeerTransport>> {
        if self.is_current(session_id) {
            self.transport.clone()
        } else {
            None
        }
    }

    pub fn media(&self) -> Option<Arc<LocalMediaHandle>> {
        self.media.clone()
    }

    // ========================================================================
    // FIRED-ONCE GUARDS
    // ========================================================================

    /// Claims the answer for application; only the first caller wins.
    pub fn claim_answer(&mut self, session_id: &str) -> bool {
        if !self.is_current(session_id) || self.answer_claimed {
            return false;
        }
        self.answer_claimed = true;
        true
    }

    /// Marks the remote description applied, opening the candidate gate.
    pub fn mark_remote_applied(&mut self, session_id: &str) -> bool {
        if !self.is_current(session_id) {
            return false;
        }
        self.remote_applied = true;
        true
    }

    /// First transport-connected report wins; later ones are no-ops.
    pub fn mark_connected(&mut self, session_id: &str) -> bool {
        if !self.is_current(session_id) || self.connected_fired {
            return false;
        }
        self.connected_fired = true;
        self.advance(CallPhase::Connected);
        true
    }

    /// Splits `entries` into the not-yet-applied ones and marks them applied
    /// before the transport sees them, so a rejected candidate is never
    /// retried on redelivery. Returns nothing while the gate is closed.
    pub fn claim_candidates(
        &mut self,
        session_id: &str,
        entries: Vec<(String, crate::signaling::IceCandidate)>,
    ) -> Option<(
        Arc<dyn PeerTransport>,
        Vec<(String, crate::signaling::IceCandidate)>,
    )> {
        if !self.is_current(session_id) || !self.remote_applied {
            return None;
        }
        let transport = self.transport.clone()?;
        let pending: Vec<_> = entries
            .into_iter()
            .filter(|(id, _)| self.applied_candidates.insert(id.clone()))
            .collect();
        Some((transport, pending))
    }

    /// Snapshot of the attempt slice the watcher needs for one scan.
    pub fn attempt_view(&self) -> crate::signaling::AttemptView {
        crate::signaling::AttemptView {
            session_id: self.session_id.clone(),
            answer_claimed: self.answer_claimed,
        }
    }
}

impl Default for LocalCallContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
