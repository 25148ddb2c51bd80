//! The pure reducer: `(state, event) -> (new state, effect requests)`.
//!
//! No I/O, no clock reads beyond the event's own timestamp, no
//! randomness. Folding the same ordered events from the same initial
//! state always yields the same final state and the same effect
//! sequence; this is the property replay, pause/resume and audit all
//! stand on. Effects are descriptive requests only — the reducer never
//! performs them.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::event::{
    CommandSpec, DiffPayload, EffectKind, EffectRequest, EventKind, EventRecord, HeldProposal,
    SessionEvent, SessionId,
};
use crate::scope::ScopeDescriptor;
use crate::session::Stage;
use crate::tier::TierPolicy;

/// A held proposal awaiting an explicit human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Sequence of the `ApprovalRequested` event that opened the hold.
    pub request_seq: u64,
    pub held: HeldProposal,
    pub reason: String,
}

/// Full state of one session, reconstructable from its event log alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub stage: Stage,
    /// Tier snapshot taken at session creation.
    pub tier: Option<TierPolicy>,
    pub target_path: Option<String>,
    /// Scope requested at start; advisory until isolation pins it.
    pub requested_scope: Option<ScopeDescriptor>,
    /// Effective scope, set once at the isolate stage.
    pub scope: Option<ScopeDescriptor>,
    pub verify_command: Option<CommandSpec>,
    pub last_seq: u64,
    pub pending: Option<PendingApproval>,
    /// One-shot approval marker, consumed by the retried transition.
    pub approved: Option<EventKind>,
    /// Diff carried over from an approved implement proposal.
    pub approved_diff: Option<DiffPayload>,
    /// Effect requested but not yet recorded back.
    pub outstanding: Option<EffectKind>,
    /// A succeeded implementation outcome has been recorded.
    pub implemented: bool,
    pub abort_reason: Option<String>,
}

impl SessionState {
    /// Canonical initial state, before any event.
    pub fn initial(id: SessionId) -> Self {
        Self {
            id,
            stage: Stage::Initiated,
            tier: None,
            target_path: None,
            requested_scope: None,
            scope: None,
            verify_command: None,
            last_seq: 0,
            pending: None,
            approved: None,
            approved_diff: None,
            outstanding: None,
            implemented: false,
            abort_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn awaiting_approval(&self) -> bool {
        self.pending.is_some()
    }
}

/// Fold one event onto a state.
///
/// An event kind that is illegal for the current state is a programming
/// error, reported as `InvalidTransition` and never silently ignored.
pub fn apply(
    state: &SessionState,
    record: &EventRecord,
) -> Result<(SessionState, Vec<EffectRequest>), EngineError> {
    let kind = record.kind();
    let illegal = || EngineError::InvalidTransition {
        stage: state.stage,
        kind,
    };

    if record.seq != state.last_seq + 1 {
        return Err(EngineError::ConcurrentSequenceConflict {
            session: state.id,
            expected: state.last_seq + 1,
            got: record.seq,
        });
    }
    if state.is_terminal() {
        return Err(illegal());
    }

    let mut next = state.clone();
    next.last_seq = record.seq;
    let mut effects = Vec::new();

    match &record.event {
        SessionEvent::SessionStarted {
            tier,
            target_path,
            requested_scope,
            verify_command,
        } => {
            if state.last_seq != 0 || state.stage != Stage::Initiated {
                return Err(illegal());
            }
            next.tier = Some(tier.clone());
            next.target_path = Some(target_path.clone());
            next.requested_scope = Some(requested_scope.clone());
            next.verify_command = Some(verify_command.clone());
        }
        SessionEvent::IntentInterpreted { inspect_paths, .. } => {
            if state.stage != Stage::Initiated || state.tier.is_none() || state.pending.is_some() {
                return Err(illegal());
            }
            next.stage = Stage::Interpreted;
            next.outstanding = Some(EffectKind::Inspect);
            effects.push(EffectRequest::Inspect {
                paths: inspect_paths.clone(),
            });
        }
        SessionEvent::StateInspected { .. } => {
            if state.stage != Stage::Interpreted {
                return Err(illegal());
            }
            next.stage = Stage::Inspected;
            next.outstanding = None;
        }
        SessionEvent::ScopeIsolated { scope } => {
            if state.stage != Stage::Inspected || state.pending.is_some() {
                return Err(illegal());
            }
            next.stage = Stage::Isolated;
            next.scope = Some(scope.clone());
        }
        SessionEvent::ApprovalRequested { held, reason } => {
            if state.pending.is_some() {
                return Err(illegal());
            }
            if state.stage.forward_kind() != Some(held.target_kind()) {
                return Err(illegal());
            }
            next.pending = Some(PendingApproval {
                request_seq: record.seq,
                held: held.clone(),
                reason: reason.clone(),
            });
        }
        SessionEvent::ApprovalGranted { request_seq } => {
            let pending = state.pending.as_ref().ok_or_else(illegal)?;
            if pending.request_seq != *request_seq {
                return Err(illegal());
            }
            next.pending = None;
            next.approved = Some(pending.held.target_kind());
            if let HeldProposal::Implement { diff } = &pending.held {
                next.approved_diff = Some(diff.clone());
                next.outstanding = Some(EffectKind::Implement);
                effects.push(EffectRequest::Implement { diff: diff.clone() });
            }
        }
        SessionEvent::ApprovalDenied { request_seq, .. } => {
            let pending = state.pending.as_ref().ok_or_else(illegal)?;
            if pending.request_seq != *request_seq {
                return Err(illegal());
            }
            next.pending = None;
        }
        SessionEvent::ChangeImplemented { outcome, .. } => {
            if state.stage != Stage::Isolated {
                return Err(illegal());
            }
            if state.approved != Some(EventKind::ChangeImplemented) {
                return Err(illegal());
            }
            next.approved = None;
            next.approved_diff = None;
            if outcome.succeeded {
                next.stage = Stage::Implemented;
                next.implemented = true;
                let command = next
                    .verify_command
                    .clone()
                    .ok_or_else(|| EngineError::Corrupt("missing verify command".to_string()))?;
                next.outstanding = Some(EffectKind::RunVerification);
                effects.push(EffectRequest::RunVerification { command });
            } else {
                // Recorded as-is; the stage stays put so a retry is a
                // fresh intent with a fresh approval round.
                next.outstanding = None;
            }
        }
        SessionEvent::VerificationRecorded { .. } => {
            if state.stage != Stage::Implemented || !state.implemented {
                return Err(illegal());
            }
            next.stage = Stage::Verified;
            next.outstanding = None;
        }
        SessionEvent::Integrated { .. } => {
            if state.stage != Stage::Verified {
                return Err(illegal());
            }
            if state.approved != Some(EventKind::Integrated) {
                return Err(illegal());
            }
            next.approved = None;
            next.stage = Stage::Integrated;
        }
        SessionEvent::Aborted { reason } => {
            next.stage = Stage::Aborted;
            next.pending = None;
            next.approved = None;
            next.approved_diff = None;
            next.outstanding = None;
            next.abort_reason = Some(reason.clone());
        }
    }

    Ok((next, effects))
}

/// Rebuild a session state by folding its full ordered log.
///
/// Requested effects are recomputed and discarded; replay reconstructs
/// state, it never re-executes.
pub fn replay(id: SessionId, records: &[EventRecord]) -> Result<SessionState, EngineError> {
    replay_from(SessionState::initial(id), records)
}

/// Fold a log tail onto a known-good state (a snapshot).
pub fn replay_from(
    mut state: SessionState,
    records: &[EventRecord],
) -> Result<SessionState, EngineError> {
    for record in records {
        state = apply(&state, record)?.0;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EffectOutcome;
    use crate::tier::TierPreset;
    use pretty_assertions::assert_eq;

    fn record(state: &SessionState, event: SessionEvent) -> EventRecord {
        EventRecord::new(state.id, state.last_seq + 1, 0, event)
    }

    fn started() -> SessionState {
        let state = SessionState::initial(SessionId::new());
        let rec = record(
            &state,
            SessionEvent::SessionStarted {
                tier: TierPreset::Medium.policy(),
                target_path: "/work/repo".to_string(),
                requested_scope: ScopeDescriptor::new(["src/"]),
                verify_command: CommandSpec::new("cargo", vec!["test".to_string()]),
            },
        );
        apply(&state, &rec).expect("start").0
    }

    fn diff() -> DiffPayload {
        DiffPayload {
            summary: "tighten parser bounds".to_string(),
            touched_paths: vec!["src/parser.rs".to_string()],
            body: "--- a/src/parser.rs".to_string(),
        }
    }

    #[test]
    fn interpret_emits_an_inspect_effect() {
        let state = started();
        let rec = record(
            &state,
            SessionEvent::IntentInterpreted {
                summary: "fix parser".to_string(),
                inspect_paths: vec!["src/parser.rs".to_string()],
            },
        );
        let (next, effects) = apply(&state, &rec).expect("apply");
        assert_eq!(next.stage, Stage::Interpreted);
        assert_eq!(
            effects,
            vec![EffectRequest::Inspect {
                paths: vec!["src/parser.rs".to_string()]
            }]
        );
    }

    #[test]
    fn stages_cannot_be_skipped() {
        let state = started();
        // Jumping straight to isolation from Initiated is illegal.
        let rec = record(
            &state,
            SessionEvent::ScopeIsolated {
                scope: ScopeDescriptor::new(["src/"]),
            },
        );
        let err = apply(&state, &rec).expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn change_without_approval_marker_is_rejected() {
        let mut state = started();
        state.stage = Stage::Isolated;
        state.scope = Some(ScopeDescriptor::new(["src/"]));
        let rec = record(
            &state,
            SessionEvent::ChangeImplemented {
                diff: diff(),
                outcome: EffectOutcome::success("applied"),
            },
        );
        let err = apply(&state, &rec).expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn granted_implement_approval_emits_the_implement_effect() {
        let mut state = started();
        state.stage = Stage::Isolated;
        state.scope = Some(ScopeDescriptor::new(["src/"]));

        let request = record(
            &state,
            SessionEvent::ApprovalRequested {
                held: HeldProposal::Implement { diff: diff() },
                reason: "human approval required".to_string(),
            },
        );
        let (held_state, effects) = apply(&state, &request).expect("hold");
        assert!(effects.is_empty());
        assert!(held_state.awaiting_approval());

        let grant = record(
            &held_state,
            SessionEvent::ApprovalGranted {
                request_seq: request.seq,
            },
        );
        let (granted, effects) = apply(&held_state, &grant).expect("grant");
        assert_eq!(granted.approved, Some(EventKind::ChangeImplemented));
        assert_eq!(effects, vec![EffectRequest::Implement { diff: diff() }]);
        assert_eq!(granted.stage, Stage::Isolated);
    }

    #[test]
    fn failed_implementation_keeps_the_stage_and_consumes_the_approval() {
        let mut state = started();
        state.stage = Stage::Isolated;
        state.scope = Some(ScopeDescriptor::new(["src/"]));
        state.approved = Some(EventKind::ChangeImplemented);
        state.approved_diff = Some(diff());
        state.outstanding = Some(EffectKind::Implement);

        let rec = record(
            &state,
            SessionEvent::ChangeImplemented {
                diff: diff(),
                outcome: EffectOutcome::failure("patch did not apply"),
            },
        );
        let (next, effects) = apply(&state, &rec).expect("apply");
        assert_eq!(next.stage, Stage::Isolated);
        assert!(!next.implemented);
        assert_eq!(next.approved, None);
        assert!(effects.is_empty());
    }

    #[test]
    fn succeeded_implementation_schedules_verification() {
        let mut state = started();
        state.stage = Stage::Isolated;
        state.scope = Some(ScopeDescriptor::new(["src/"]));
        state.approved = Some(EventKind::ChangeImplemented);

        let rec = record(
            &state,
            SessionEvent::ChangeImplemented {
                diff: diff(),
                outcome: EffectOutcome::success("applied"),
            },
        );
        let (next, effects) = apply(&state, &rec).expect("apply");
        assert_eq!(next.stage, Stage::Implemented);
        assert!(next.implemented);
        assert_eq!(
            effects,
            vec![EffectRequest::RunVerification {
                command: CommandSpec::new("cargo", vec!["test".to_string()])
            }]
        );
    }

    #[test]
    fn verification_requires_a_prior_implementation_record() {
        let mut state = started();
        state.stage = Stage::Implemented;
        state.implemented = false;
        let rec = record(
            &state,
            SessionEvent::VerificationRecorded {
                outcome: EffectOutcome::success("42 tests passed"),
                passed: true,
            },
        );
        let err = apply(&state, &rec).expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn integration_requires_its_own_approval() {
        let mut state = started();
        state.stage = Stage::Verified;
        let rec = record(
            &state,
            SessionEvent::Integrated {
                detail: "merged".to_string(),
            },
        );
        let err = apply(&state, &rec).expect_err("must reject");
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        state.approved = Some(EventKind::Integrated);
        let rec = record(
            &state,
            SessionEvent::Integrated {
                detail: "merged".to_string(),
            },
        );
        let (next, effects) = apply(&state, &rec).expect("apply");
        assert_eq!(next.stage, Stage::Integrated);
        assert!(next.is_terminal());
        assert!(effects.is_empty());
    }

    #[test]
    fn abort_is_legal_from_any_non_terminal_state() {
        for stage in [
            Stage::Initiated,
            Stage::Interpreted,
            Stage::Inspected,
            Stage::Isolated,
            Stage::Implemented,
            Stage::Verified,
        ] {
            let mut state = started();
            state.stage = stage;
            state.implemented = stage >= Stage::Implemented;
            let rec = record(
                &state,
                SessionEvent::Aborted {
                    reason: "operator exit".to_string(),
                },
            );
            let (next, effects) = apply(&state, &rec).expect("abort");
            assert_eq!(next.stage, Stage::Aborted);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let mut state = started();
        state.stage = Stage::Aborted;
        let rec = record(
            &state,
            SessionEvent::Aborted {
                reason: "again".to_string(),
            },
        );
        assert!(apply(&state, &rec).is_err());
    }

    #[test]
    fn out_of_order_sequence_is_a_conflict() {
        let state = started();
        let rec = EventRecord::new(
            state.id,
            state.last_seq + 2,
            0,
            SessionEvent::IntentInterpreted {
                summary: "s".to_string(),
                inspect_paths: vec![],
            },
        );
        let err = apply(&state, &rec).expect_err("must reject");
        assert!(matches!(
            err,
            EngineError::ConcurrentSequenceConflict { .. }
        ));
    }
}
