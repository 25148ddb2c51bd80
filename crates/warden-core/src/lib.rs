//! Warden core: policy-governed orchestration for assisted code changes.
//!
//! Every session walks a fixed stage ladder and leaves an append-only,
//! hash-chained event log behind; the log is the sole source of truth
//! and replaying it reproduces the exact state. Side effects live
//! behind the executor boundary and consequential transitions pass a
//! stateless policy gate first.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use warden_core::prelude::*;
//!
//! let orchestrator = Orchestrator::with_journal(config, executor)?;
//! let view = orchestrator
//!     .handle(Intent::StartSession {
//!         tier: Some("medium".into()),
//!         target_path: "/work/repo".into(),
//!         requested_scope: ScopeDescriptor::new(["src/"]),
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod policy;
pub mod reducer;
pub mod scope;
pub mod session;
pub mod store;
pub mod tier;

pub use error::EngineError;
pub use event::{
    CommandSpec, DiffPayload, EffectKind, EffectOutcome, EffectRequest, EventKind, EventRecord,
    HeldProposal, SessionEvent, SessionId,
};
pub use session::Stage;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::EngineError;
    pub use crate::event::{
        CommandSpec, DiffPayload, EffectKind, EffectOutcome, EffectRequest, EventKind,
        EventRecord, HeldProposal, SessionEvent, SessionId,
    };
    pub use crate::orchestrator::{EffectExecutor, Intent, Orchestrator, SessionView};
    pub use crate::policy::{PolicyGate, RequestMetadata, Verdict};
    pub use crate::reducer::SessionState;
    pub use crate::scope::ScopeDescriptor;
    pub use crate::session::{Advance, Proposal, SessionMachine, SessionParams, Stage};
    pub use crate::store::{EventStore, JournalStore, MemoryStore, Snapshot};
    pub use crate::tier::{TierPolicy, TierPreset};
}

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
