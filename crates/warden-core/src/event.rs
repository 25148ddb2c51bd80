//! Session events and effect contracts.
//!
//! Every event is an immutable, ordered record; the per-session log is
//! the sole source of truth for session state. Payloads carry everything
//! the reducer needs so that replay never consults external state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::scope::ScopeDescriptor;
use crate::tier::TierPolicy;

/// Identifier for one unit of work against one target repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant for [`SessionEvent`], used in transition legality checks
/// and policy gate lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    IntentInterpreted,
    StateInspected,
    ScopeIsolated,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    ChangeImplemented,
    VerificationRecorded,
    Integrated,
    Aborted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::IntentInterpreted => "intent_interpreted",
            Self::StateInspected => "state_inspected",
            Self::ScopeIsolated => "scope_isolated",
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalDenied => "approval_denied",
            Self::ChangeImplemented => "change_implemented",
            Self::VerificationRecorded => "verification_recorded",
            Self::Integrated => "integrated",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque change payload supplied by a planning collaborator.
///
/// The core never interprets `body`; `touched_paths` is the metadata the
/// policy gate checks against the declared scope and tier limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffPayload {
    pub summary: String,
    pub touched_paths: Vec<String>,
    pub body: String,
}

/// Command the executor runs for the verification effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Outcome record returned by the executor collaborator.
///
/// A failed outcome is ordinary data, recorded as-is; the core never
/// retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectOutcome {
    pub succeeded: bool,
    pub detail: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl EffectOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            detail: detail.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            detail: detail.into(),
            artifacts: Vec::new(),
        }
    }
}

/// Effect requests the core hands to the executor collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectRequest {
    Inspect { paths: Vec<String> },
    Implement { diff: DiffPayload },
    RunVerification { command: CommandSpec },
}

impl EffectRequest {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Inspect { .. } => EffectKind::Inspect,
            Self::Implement { .. } => EffectKind::Implement,
            Self::RunVerification { .. } => EffectKind::RunVerification,
        }
    }
}

/// Discriminant for [`EffectRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Inspect,
    Implement,
    RunVerification,
}

impl EffectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::Implement => "implement",
            Self::RunVerification => "run_verification",
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The proposal held while a session awaits human approval.
///
/// Persisted inside [`SessionEvent::ApprovalRequested`] so the
/// awaiting-approval sub-state survives restarts via replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "proposal", rename_all = "snake_case")]
pub enum HeldProposal {
    Implement { diff: DiffPayload },
    Integrate,
}

impl HeldProposal {
    /// Event kind the held proposal will land as once approved.
    pub fn target_kind(&self) -> EventKind {
        match self {
            Self::Implement { .. } => EventKind::ChangeImplemented,
            Self::Integrate => EventKind::Integrated,
        }
    }
}

/// One session event. Kind-specific payloads are internally tagged for
/// the JSON Lines journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        tier: TierPolicy,
        target_path: String,
        requested_scope: ScopeDescriptor,
        verify_command: CommandSpec,
    },
    IntentInterpreted {
        summary: String,
        inspect_paths: Vec<String>,
    },
    StateInspected {
        outcome: EffectOutcome,
    },
    ScopeIsolated {
        scope: ScopeDescriptor,
    },
    ApprovalRequested {
        held: HeldProposal,
        reason: String,
    },
    ApprovalGranted {
        request_seq: u64,
    },
    ApprovalDenied {
        request_seq: u64,
        reason: String,
    },
    ChangeImplemented {
        diff: DiffPayload,
        outcome: EffectOutcome,
    },
    VerificationRecorded {
        outcome: EffectOutcome,
        passed: bool,
    },
    Integrated {
        detail: String,
    },
    Aborted {
        reason: String,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStarted { .. } => EventKind::SessionStarted,
            Self::IntentInterpreted { .. } => EventKind::IntentInterpreted,
            Self::StateInspected { .. } => EventKind::StateInspected,
            Self::ScopeIsolated { .. } => EventKind::ScopeIsolated,
            Self::ApprovalRequested { .. } => EventKind::ApprovalRequested,
            Self::ApprovalGranted { .. } => EventKind::ApprovalGranted,
            Self::ApprovalDenied { .. } => EventKind::ApprovalDenied,
            Self::ChangeImplemented { .. } => EventKind::ChangeImplemented,
            Self::VerificationRecorded { .. } => EventKind::VerificationRecorded,
            Self::Integrated { .. } => EventKind::Integrated,
            Self::Aborted { .. } => EventKind::Aborted,
        }
    }
}

/// An event as persisted: monotonic sequence, timestamp, SHA-256 chain.
///
/// `prev_hash`/`hash` are assigned by the store at append time; values
/// supplied by callers are overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: SessionId,
    pub seq: u64,
    pub ts_ms: i64,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl EventRecord {
    pub fn new(session_id: SessionId, seq: u64, ts_ms: i64, event: SessionEvent) -> Self {
        Self {
            session_id,
            seq,
            ts_ms,
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
            event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_kind_labels_are_stable() {
        assert_eq!(EventKind::SessionStarted.as_str(), "session_started");
        assert_eq!(EventKind::ChangeImplemented.as_str(), "change_implemented");
        assert_eq!(EventKind::Aborted.as_str(), "aborted");
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = EventRecord::new(
            SessionId::new(),
            3,
            1_700_000_000_000,
            SessionEvent::IntentInterpreted {
                summary: "rename the config loader".to_string(),
                inspect_paths: vec!["src/config.rs".to_string()],
            },
        );
        let line = serde_json::to_string(&record).expect("serialize");
        let parsed: EventRecord = serde_json::from_str(&line).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn held_proposal_targets_the_gated_kind() {
        let held = HeldProposal::Implement {
            diff: DiffPayload {
                summary: "s".to_string(),
                touched_paths: vec![],
                body: String::new(),
            },
        };
        assert_eq!(held.target_kind(), EventKind::ChangeImplemented);
        assert_eq!(HeldProposal::Integrate.target_kind(), EventKind::Integrated);
    }
}
