//! A scripted, in-process executor.
//!
//! Outcomes are queued per effect kind; unscripted requests succeed
//! with a canned detail. Every request is recorded so tests can assert
//! on exactly what the core asked for.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use warden_core::event::{EffectKind, EffectOutcome, EffectRequest, SessionId};
use warden_core::orchestrator::EffectExecutor;

/// One request the executor received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub session: SessionId,
    pub request: EffectRequest,
}

/// Executor that performs nothing and answers from a script.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    scripts: Mutex<HashMap<EffectKind, VecDeque<EffectOutcome>>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome for `kind`. Scripted outcomes are
    /// consumed in FIFO order, one per request.
    pub fn script(&self, kind: EffectKind, outcome: EffectOutcome) {
        self.scripts.lock().entry(kind).or_default().push_back(outcome);
    }

    /// Builder-style scripting for test setup.
    pub fn with_script(self, kind: EffectKind, outcome: EffectOutcome) -> Self {
        self.script(kind, outcome);
        self
    }

    /// Everything the core has asked this executor to do so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    fn default_outcome(kind: EffectKind) -> EffectOutcome {
        match kind {
            EffectKind::Inspect => EffectOutcome::success("inspected: working tree clean"),
            EffectKind::Implement => EffectOutcome::success("simulated patch applied"),
            EffectKind::RunVerification => EffectOutcome::success("simulated verification passed"),
        }
    }
}

#[async_trait]
impl EffectExecutor for SimulatedExecutor {
    async fn execute(&self, session: SessionId, request: &EffectRequest) -> EffectOutcome {
        let kind = request.kind();
        self.invocations.lock().push(Invocation {
            session,
            request: request.clone(),
        });
        let scripted = self
            .scripts
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        let outcome = scripted.unwrap_or_else(|| Self::default_outcome(kind));
        debug!(session = %session, effect = %kind, succeeded = outcome.succeeded, "simulated effect");
        outcome
    }
}
