//! The session stage ladder and the machine that drives it.
//!
//! [`SessionMachine`] is the only writer for a session: it evaluates the
//! policy gate, runs the pure reducer against a candidate record, and
//! appends to the store only when both accept. A rejected proposal
//! leaves state and log untouched.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::event::{
    CommandSpec, DiffPayload, EffectKind, EffectOutcome, EffectRequest, EventKind, EventRecord,
    HeldProposal, SessionEvent, SessionId,
};
use crate::policy::{PolicyGate, RequestMetadata, Verdict, REASON_HUMAN_APPROVAL_REQUIRED};
use crate::reducer::{self, SessionState};
use crate::scope::ScopeDescriptor;
use crate::store::EventStore;
use crate::tier::TierPolicy;

/// The seven stage ladder plus the terminal abort.
///
/// Ordering follows the ladder; `Aborted` sorts last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initiated,
    Interpreted,
    Inspected,
    Isolated,
    Implemented,
    Verified,
    Integrated,
    Aborted,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Interpreted => "interpreted",
            Self::Inspected => "inspected",
            Self::Isolated => "isolated",
            Self::Implemented => "implemented",
            Self::Verified => "verified",
            Self::Integrated => "integrated",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Integrated | Self::Aborted)
    }

    /// The single event kind that moves this stage forward, if any.
    pub fn forward_kind(self) -> Option<EventKind> {
        match self {
            Self::Initiated => Some(EventKind::IntentInterpreted),
            Self::Interpreted => Some(EventKind::StateInspected),
            Self::Inspected => Some(EventKind::ScopeIsolated),
            Self::Isolated => Some(EventKind::ChangeImplemented),
            Self::Implemented => Some(EventKind::VerificationRecorded),
            Self::Verified => Some(EventKind::Integrated),
            Self::Integrated | Self::Aborted => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for starting a fresh session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub tier: TierPolicy,
    pub target_path: String,
    pub requested_scope: ScopeDescriptor,
    pub verify_command: CommandSpec,
}

/// A forward move requested by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Interpret {
        summary: String,
        inspect_paths: Vec<String>,
    },
    Isolate {
        scope: ScopeDescriptor,
    },
    Implement {
        diff: DiffPayload,
    },
    Integrate,
}

/// What a committed step produced: the new stage, whether a proposal is
/// now held for approval, and any effect requests the caller must hand
/// to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub stage: Stage,
    pub awaiting_approval: bool,
    pub effects: Vec<EffectRequest>,
}

/// Single-writer state machine for one session.
pub struct SessionMachine {
    state: SessionState,
    store: Arc<dyn EventStore>,
}

impl SessionMachine {
    /// Start a new session; appends `SessionStarted` as record one.
    pub fn start(store: Arc<dyn EventStore>, params: SessionParams) -> Result<Self, EngineError> {
        let id = SessionId::new();
        let mut machine = Self {
            state: SessionState::initial(id),
            store,
        };
        info!(session = %id, tier = %params.tier.name, "starting session");
        machine.commit(SessionEvent::SessionStarted {
            tier: params.tier,
            target_path: params.target_path,
            requested_scope: params.requested_scope,
            verify_command: params.verify_command,
        })?;
        Ok(machine)
    }

    /// Rebuild a session from its persisted log.
    pub fn load(store: Arc<dyn EventStore>, id: SessionId) -> Result<Self, EngineError> {
        let records = store.read_all(id)?;
        if records.is_empty() {
            return Err(EngineError::SessionNotFound(id));
        }
        let state = reducer::replay(id, &records)?;
        debug!(session = %id, seq = state.last_seq, stage = %state.stage, "session replayed");
        Ok(Self { state, store })
    }

    /// Attach to a state already reconstructed elsewhere, such as a
    /// verified snapshot-plus-tail resume. The caller vouches that
    /// `state` is the fold of the store's log for this session.
    pub fn attach(store: Arc<dyn EventStore>, state: SessionState) -> Self {
        Self { state, store }
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    fn tier(&self) -> Result<&TierPolicy, EngineError> {
        self.state
            .tier
            .as_ref()
            .ok_or_else(|| EngineError::Corrupt("session log missing session_started".to_string()))
    }

    /// Evaluate and, where allowed, commit a forward proposal.
    ///
    /// A `RequireApproval` verdict commits an `ApprovalRequested` hold
    /// instead of the proposal itself; the session then waits for
    /// [`Self::resolve_approval`].
    pub fn propose(&mut self, proposal: Proposal) -> Result<Advance, EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::SessionTerminal(self.state.id));
        }
        if self.state.awaiting_approval() {
            return Err(EngineError::ApprovalPending(self.state.id));
        }

        match proposal {
            Proposal::Interpret {
                summary,
                inspect_paths,
            } => {
                self.gate(EventKind::IntentInterpreted, RequestMetadata::for_paths(inspect_paths.clone()))?;
                self.commit(SessionEvent::IntentInterpreted {
                    summary,
                    inspect_paths,
                })
            }
            Proposal::Isolate { scope } => {
                self.gate(EventKind::ScopeIsolated, RequestMetadata::none())?;
                self.commit(SessionEvent::ScopeIsolated { scope })
            }
            Proposal::Implement { diff } => self.propose_gated(
                EventKind::ChangeImplemented,
                RequestMetadata::for_paths(diff.touched_paths.clone()),
                HeldProposal::Implement { diff },
            ),
            Proposal::Integrate => self.propose_gated(
                EventKind::Integrated,
                RequestMetadata::none(),
                HeldProposal::Integrate,
            ),
        }
    }

    fn propose_gated(
        &mut self,
        kind: EventKind,
        metadata: RequestMetadata,
        held: HeldProposal,
    ) -> Result<Advance, EngineError> {
        match PolicyGate::check(
            self.tier()?,
            self.state.stage,
            kind,
            self.state.scope.as_ref(),
            &metadata,
        ) {
            Verdict::Deny { reason } => {
                warn!(session = %self.state.id, kind = %kind, %reason, "policy denied");
                Err(EngineError::PolicyDenied(reason))
            }
            // Human-gated kinds never pass the gate unapproved.
            Verdict::Allow | Verdict::RequireApproval => {
                info!(session = %self.state.id, kind = %kind, "holding proposal for approval");
                self.commit(SessionEvent::ApprovalRequested {
                    held,
                    reason: REASON_HUMAN_APPROVAL_REQUIRED.to_string(),
                })
            }
        }
    }

    fn gate(&self, kind: EventKind, metadata: RequestMetadata) -> Result<(), EngineError> {
        match PolicyGate::check(
            self.tier()?,
            self.state.stage,
            kind,
            self.state.scope.as_ref(),
            &metadata,
        ) {
            Verdict::Allow => Ok(()),
            Verdict::Deny { reason } => {
                warn!(session = %self.state.id, kind = %kind, %reason, "policy denied");
                Err(EngineError::PolicyDenied(reason))
            }
            Verdict::RequireApproval => Err(EngineError::PolicyDenied(
                REASON_HUMAN_APPROVAL_REQUIRED.to_string(),
            )),
        }
    }

    /// Grant or deny the held proposal.
    ///
    /// Granting an integrate hold also commits the `Integrated` record
    /// in the same call, consuming the one-shot approval. Granting an
    /// implement hold re-checks tier limits with the approval marker
    /// set; approval bypasses the human gate, never the limits.
    pub fn resolve_approval(&mut self, approve: bool, note: &str) -> Result<Advance, EngineError> {
        let pending = self
            .state
            .pending
            .clone()
            .ok_or(EngineError::NoPendingApproval(self.state.id))?;

        if !approve {
            info!(session = %self.state.id, "approval denied");
            return self.commit(SessionEvent::ApprovalDenied {
                request_seq: pending.request_seq,
                reason: note.to_string(),
            });
        }

        let metadata = match &pending.held {
            HeldProposal::Implement { diff } => {
                RequestMetadata::for_paths(diff.touched_paths.clone()).approved()
            }
            HeldProposal::Integrate => RequestMetadata::none().approved(),
        };
        if let Verdict::Deny { reason } = PolicyGate::check(
            self.tier()?,
            self.state.stage,
            pending.held.target_kind(),
            self.state.scope.as_ref(),
            &metadata,
        ) {
            warn!(session = %self.state.id, %reason, "granted proposal still denied by tier limits");
            return Err(EngineError::PolicyDenied(reason));
        }

        info!(session = %self.state.id, "approval granted");
        let advance = self.commit(SessionEvent::ApprovalGranted {
            request_seq: pending.request_seq,
        })?;

        if matches!(pending.held, HeldProposal::Integrate) {
            return self.commit(SessionEvent::Integrated {
                detail: note.to_string(),
            });
        }
        Ok(advance)
    }

    /// Record the executor's outcome for the outstanding effect.
    ///
    /// Failed outcomes are recorded faithfully; for the implement effect
    /// a failure leaves the stage in place with the approval spent.
    pub fn record_outcome(
        &mut self,
        kind: EffectKind,
        outcome: EffectOutcome,
    ) -> Result<Advance, EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::SessionTerminal(self.state.id));
        }
        if self.state.outstanding != Some(kind) {
            return Err(EngineError::UnexpectedOutcome(format!(
                "no outstanding {kind} effect for session {}",
                self.state.id
            )));
        }

        match kind {
            EffectKind::Inspect => self.commit(SessionEvent::StateInspected { outcome }),
            EffectKind::Implement => {
                let diff = self.state.approved_diff.clone().ok_or_else(|| {
                    EngineError::UnexpectedOutcome(format!(
                        "no approved diff for session {}",
                        self.state.id
                    ))
                })?;
                self.commit(SessionEvent::ChangeImplemented { diff, outcome })
            }
            EffectKind::RunVerification => {
                let passed = outcome.succeeded;
                self.commit(SessionEvent::VerificationRecorded { outcome, passed })
            }
        }
    }

    /// Abort the session. Legal from any non-terminal state, pending
    /// approval included.
    pub fn abort(&mut self, reason: &str) -> Result<Advance, EngineError> {
        if self.state.is_terminal() {
            return Err(EngineError::SessionTerminal(self.state.id));
        }
        info!(session = %self.state.id, %reason, "aborting session");
        self.commit(SessionEvent::Aborted {
            reason: reason.to_string(),
        })
    }

    /// Reduce against a candidate record, then append. The reducer runs
    /// first so a rejected event or a sequence conflict leaves the
    /// in-memory state exactly as it was.
    fn commit(&mut self, event: SessionEvent) -> Result<Advance, EngineError> {
        let record = EventRecord::new(
            self.state.id,
            self.state.last_seq + 1,
            Utc::now().timestamp_millis(),
            event,
        );
        let (next, effects) = reducer::apply(&self.state, &record)?;
        for effect in &effects {
            if let Verdict::Deny { reason } = PolicyGate::check_effect(next.stage, effect) {
                return Err(EngineError::PolicyDenied(reason));
            }
        }
        self.store.append(record)?;
        self.state = next;
        debug!(
            session = %self.state.id,
            seq = self.state.last_seq,
            stage = %self.state.stage,
            "event committed"
        );
        Ok(Advance {
            stage: self.state.stage,
            awaiting_approval: self.state.awaiting_approval(),
            effects,
        })
    }
}
