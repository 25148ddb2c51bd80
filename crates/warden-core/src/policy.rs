//! The policy gate: a stateless, side-effect-free verdict function.
//!
//! The gate may be called speculatively (for previews) without
//! committing anything; identical arguments always yield the identical
//! verdict.

use serde::{Deserialize, Serialize};

use crate::event::{EffectRequest, EventKind};
use crate::scope::ScopeDescriptor;
use crate::session::Stage;
use crate::tier::TierPolicy;

pub const REASON_TIER_FORBIDS_EXECUTION: &str = "tier forbids execution";
pub const REASON_OUT_OF_SCOPE: &str = "out of declared scope";
pub const REASON_EXCEEDS_TIER_LIMITS: &str = "exceeds tier limits";
pub const REASON_WRITE_FROM_READ_ONLY_STAGE: &str = "write effect from read-only stage";
pub const REASON_HUMAN_APPROVAL_REQUIRED: &str = "human approval required";

/// Result of a policy check. Never persisted on its own; it only gates
/// whether an event may be appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny { reason: String },
    RequireApproval,
}

impl Verdict {
    fn deny(reason: &str) -> Self {
        Self::Deny {
            reason: reason.to_string(),
        }
    }
}

/// Capability class a transition or effect needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Write,
    Execute,
}

/// Metadata about the request under evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Paths the request would touch, if any.
    pub paths: Vec<String>,
    /// Whether a matching approval has already been granted for this
    /// transition (one-shot, tracked by the session state).
    pub approval_granted: bool,
}

impl RequestMetadata {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_paths(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            approval_granted: false,
        }
    }

    pub fn approved(mut self) -> Self {
        self.approval_granted = true;
        self
    }

    /// A request crosses modules when its paths span more than one
    /// top-level directory.
    pub fn crosses_modules(&self) -> bool {
        let mut first: Option<&str> = None;
        for path in &self.paths {
            let root = path
                .strip_prefix("./")
                .unwrap_or(path)
                .split('/')
                .next()
                .unwrap_or("");
            match first {
                None => first = Some(root),
                Some(seen) if seen != root => return true,
                Some(_) => {}
            }
        }
        false
    }
}

/// The gate itself. Holds no state; every decision is a pure function of
/// its arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyGate;

impl PolicyGate {
    /// Capability a proposed transition kind requires.
    pub fn required_capability(kind: EventKind) -> Capability {
        match kind {
            EventKind::ChangeImplemented => Capability::Write,
            EventKind::VerificationRecorded | EventKind::Integrated => Capability::Execute,
            _ => Capability::Read,
        }
    }

    /// The two fixed human-gated transitions. No tier may bypass them.
    pub fn is_human_gated(kind: EventKind) -> bool {
        matches!(kind, EventKind::ChangeImplemented | EventKind::Integrated)
    }

    /// Evaluate a proposed transition. Rules apply in order; the first
    /// that fires decides.
    pub fn check(
        tier: &TierPolicy,
        _current: Stage,
        proposed: EventKind,
        scope: Option<&ScopeDescriptor>,
        metadata: &RequestMetadata,
    ) -> Verdict {
        // 1. Execution capability.
        if Self::required_capability(proposed) != Capability::Read && !tier.allow_execution {
            return Verdict::deny(REASON_TIER_FORBIDS_EXECUTION);
        }

        // 2. Scope containment, once a scope has been declared.
        if let Some(scope) = scope {
            if !scope.allows_all(metadata.paths.iter().map(String::as_str)) {
                return Verdict::deny(REASON_OUT_OF_SCOPE);
            }
        }

        // 3. Fixed human gates, unless this exact transition was already
        //    approved.
        if Self::is_human_gated(proposed) && !metadata.approval_granted {
            return Verdict::RequireApproval;
        }

        // 4. Tier limits.
        if metadata.paths.len() > tier.max_files {
            return Verdict::deny(REASON_EXCEEDS_TIER_LIMITS);
        }
        if metadata.crosses_modules() && !tier.allow_cross_module {
            return Verdict::deny(REASON_EXCEEDS_TIER_LIMITS);
        }

        // 5. Default.
        Verdict::Allow
    }

    /// Effect requests originating from the read-only stages must be
    /// observation only.
    pub fn check_effect(current: Stage, effect: &EffectRequest) -> Verdict {
        let read_only_stage = matches!(current, Stage::Interpreted | Stage::Inspected);
        let writes = !matches!(effect, EffectRequest::Inspect { .. });
        if read_only_stage && writes {
            return Verdict::deny(REASON_WRITE_FROM_READ_ONLY_STAGE);
        }
        Verdict::Allow
    }
}
