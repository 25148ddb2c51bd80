//! Error taxonomy for the orchestration engine.
//!
//! Nothing in the core abandons a session silently; every rejection is
//! an explicit, inspectable result. Executor-reported failures are not
//! errors here — they are outcome data recorded faithfully.

use crate::event::{EventKind, SessionId};
use crate::session::Stage;

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Attempted event kind is illegal for the current stage. Always a
    /// programming or misuse error; state is unchanged.
    #[error("invalid transition: {kind} is not legal at stage {stage}")]
    InvalidTransition { stage: Stage, kind: EventKind },

    /// The policy gate refused. Recoverable; state is unchanged.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Append raced another writer. Caller must re-read latest state
    /// and retry.
    #[error("sequence conflict for session {session}: expected {expected}, got {got}")]
    ConcurrentSequenceConflict {
        session: SessionId,
        expected: u64,
        got: u64,
    },

    /// Replay produced a state inconsistent with a persisted
    /// checkpoint. Fatal: indicates log corruption or a reducer change.
    #[error("replay divergence for session {session} at seq {seq}")]
    ReplayDivergence { session: SessionId, seq: u64 },

    /// The per-session log failed its integrity checks.
    #[error("event log corrupt: {0}")]
    Corrupt(String),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session {0} is terminal")]
    SessionTerminal(SessionId),

    /// Approve/Deny arrived while nothing was held.
    #[error("no approval pending for session {0}")]
    NoPendingApproval(SessionId),

    /// A forward proposal arrived while a held proposal awaits approval.
    #[error("approval pending for session {0}; resolve it first")]
    ApprovalPending(SessionId),

    /// An executor outcome arrived for an effect the session never
    /// requested (or has already recorded).
    #[error("unexpected effect outcome: {0}")]
    UnexpectedOutcome(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the caller can sensibly continue with the same session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ReplayDivergence { .. } | Self::Corrupt(_) | Self::Io(_) | Self::Config(_) => {
                false
            }
            Self::InvalidTransition { .. }
            | Self::PolicyDenied(_)
            | Self::ConcurrentSequenceConflict { .. }
            | Self::SessionNotFound(_)
            | Self::SessionTerminal(_)
            | Self::NoPendingApproval(_)
            | Self::ApprovalPending(_)
            | Self::UnexpectedOutcome(_) => true,
        }
    }

    /// Conflicts are the one case where an automatic re-read-and-retry
    /// by the caller is the intended protocol.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentSequenceConflict { .. })
    }
}
