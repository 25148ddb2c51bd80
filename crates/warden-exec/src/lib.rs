//! Executor adapters for the Warden orchestration core.
//!
//! The core describes effects; implementations of
//! [`warden_core::orchestrator::EffectExecutor`] perform them. This
//! crate ships the simulated executor used by tests, dry runs and
//! demos.

pub mod simulated;

pub use simulated::{Invocation, SimulatedExecutor};

// The boundary contract, re-exported so executor implementations need
// only this crate.
pub use warden_core::event::{EffectKind, EffectOutcome, EffectRequest};
pub use warden_core::orchestrator::EffectExecutor;
