//! The orchestrator: many sessions, one executor boundary.
//!
//! Each session is guarded by its own async mutex; work on one session
//! never blocks another. The orchestrator owns the drive loop: every
//! committed step's effect requests are handed to the executor and the
//! outcomes fed back as events until the session settles (no effects
//! outstanding, or a hold awaits a human).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{DiffPayload, EffectOutcome, EffectRequest, EventRecord, SessionId};
use crate::scope::ScopeDescriptor;
use crate::session::{Proposal, SessionMachine, SessionParams, Stage};
use crate::store::{EventStore, JournalStore};

/// The executor boundary. Implementations perform the requested effect
/// against the real world and report what happened; they never touch
/// session state or the event log.
#[async_trait]
pub trait EffectExecutor: Send + Sync {
    async fn execute(&self, session: SessionId, request: &EffectRequest) -> EffectOutcome;
}

/// A command addressed to the orchestrator.
#[derive(Debug, Clone)]
pub enum Intent {
    StartSession {
        tier: Option<String>,
        target_path: String,
        requested_scope: ScopeDescriptor,
    },
    Interpret {
        session: SessionId,
        summary: String,
        inspect_paths: Vec<String>,
    },
    Isolate {
        session: SessionId,
        scope: ScopeDescriptor,
    },
    ProposeImplement {
        session: SessionId,
        diff: DiffPayload,
    },
    ProposeIntegrate {
        session: SessionId,
    },
    Approve {
        session: SessionId,
        note: String,
    },
    Deny {
        session: SessionId,
        note: String,
    },
    Abort {
        session: SessionId,
        reason: String,
    },
    /// Re-attach a persisted session after a restart.
    ResumeSession {
        session: SessionId,
    },
}

/// Read-only summary of one session, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub stage: Stage,
    pub tier: Option<String>,
    pub last_seq: u64,
    pub awaiting_approval: bool,
    pub abort_reason: Option<String>,
}

impl SessionView {
    fn of(machine: &SessionMachine) -> Self {
        let state = machine.state();
        Self {
            id: state.id,
            stage: state.stage,
            tier: state.tier.as_ref().map(|t| t.name.clone()),
            last_seq: state.last_seq,
            awaiting_approval: state.awaiting_approval(),
            abort_reason: state.abort_reason.clone(),
        }
    }
}

type SessionHandle = Arc<AsyncMutex<SessionMachine>>;

/// Multiplexes sessions over one store and one executor.
pub struct Orchestrator {
    store: Arc<dyn EventStore>,
    journal: Option<Arc<JournalStore>>,
    executor: Arc<dyn EffectExecutor>,
    config: EngineConfig,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EventStore>,
        executor: Arc<dyn EffectExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            journal: None,
            executor,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open the configured journal directory and orchestrate on top of
    /// it, with snapshot support enabled.
    pub fn with_journal(
        config: EngineConfig,
        executor: Arc<dyn EffectExecutor>,
    ) -> Result<Self, EngineError> {
        let journal = Arc::new(JournalStore::open(&config.journal_dir)?);
        Ok(Self {
            store: Arc::clone(&journal) as Arc<dyn EventStore>,
            journal: Some(journal),
            executor,
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Dispatch one intent, driving any resulting effects to
    /// completion before returning the session's settled view.
    #[instrument(skip_all)]
    pub async fn handle(&self, intent: Intent) -> Result<SessionView, EngineError> {
        match intent {
            Intent::StartSession {
                tier,
                target_path,
                requested_scope,
            } => self.start_session(tier, target_path, requested_scope),
            Intent::Interpret {
                session,
                summary,
                inspect_paths,
            } => {
                self.step(session, Proposal::Interpret {
                    summary,
                    inspect_paths,
                })
                .await
            }
            Intent::Isolate { session, scope } => {
                self.step(session, Proposal::Isolate { scope }).await
            }
            Intent::ProposeImplement { session, diff } => {
                self.step(session, Proposal::Implement { diff }).await
            }
            Intent::ProposeIntegrate { session } => {
                self.step(session, Proposal::Integrate).await
            }
            Intent::Approve { session, note } => self.resolve(session, true, note).await,
            Intent::Deny { session, note } => self.resolve(session, false, note).await,
            Intent::Abort { session, reason } => {
                let handle = self.session(session)?;
                let mut machine = handle.lock().await;
                self.checked(session, machine.abort(&reason))?;
                Ok(SessionView::of(&machine))
            }
            Intent::ResumeSession { session } => self.view(session).await,
        }
    }

    /// Full ordered event history of a session, for display and audit.
    pub fn history(&self, session: SessionId) -> Result<Vec<EventRecord>, EngineError> {
        let records = self.store.read_all(session)?;
        if records.is_empty() {
            return Err(EngineError::SessionNotFound(session));
        }
        Ok(records)
    }

    /// Current view of a session without changing it.
    pub async fn view(&self, session: SessionId) -> Result<SessionView, EngineError> {
        let handle = self.session(session)?;
        let machine = handle.lock().await;
        Ok(SessionView::of(&machine))
    }

    /// Views of every session the store knows about.
    pub async fn views(&self) -> Result<Vec<SessionView>, EngineError> {
        let mut out = Vec::new();
        for id in self.store.sessions()? {
            out.push(self.view(id).await?);
        }
        Ok(out)
    }

    /// Checkpoint a session to its snapshot file. Only available when
    /// orchestrating over a journal store.
    pub async fn checkpoint(&self, session: SessionId) -> Result<(), EngineError> {
        let journal = self
            .journal
            .as_ref()
            .ok_or_else(|| EngineError::Config("no journal configured".to_string()))?;
        let handle = self.session(session)?;
        let machine = handle.lock().await;
        journal.write_snapshot(machine.state())
    }

    fn start_session(
        &self,
        tier: Option<String>,
        target_path: String,
        requested_scope: ScopeDescriptor,
    ) -> Result<SessionView, EngineError> {
        let tier_name = tier.unwrap_or_else(|| self.config.default_tier.clone());
        let tier = self.config.resolve_tier(&tier_name)?;
        let machine = SessionMachine::start(
            Arc::clone(&self.store),
            SessionParams {
                tier,
                target_path,
                requested_scope,
                verify_command: self.config.verify_command.clone(),
            },
        )?;
        let view = SessionView::of(&machine);
        self.sessions
            .write()
            .insert(machine.id(), Arc::new(AsyncMutex::new(machine)));
        info!(session = %view.id, tier = ?view.tier, "session registered");
        Ok(view)
    }

    /// Fetch the cached machine, or rebuild it from the store so
    /// restarts and late attachments are transparent.
    fn session(&self, id: SessionId) -> Result<SessionHandle, EngineError> {
        if let Some(handle) = self.sessions.read().get(&id) {
            return Ok(Arc::clone(handle));
        }
        let machine = self.rebuild(id)?;
        let handle = Arc::new(AsyncMutex::new(machine));
        let mut sessions = self.sessions.write();
        // Another task may have loaded it while we replayed.
        let entry = sessions.entry(id).or_insert(handle);
        Ok(Arc::clone(entry))
    }

    /// Rebuild a machine from persisted state. Over a journal this
    /// goes through the snapshot: a checkpoint that disagrees with the
    /// log halts the resume with `ReplayDivergence` instead of
    /// continuing on a state the log does not support.
    fn rebuild(&self, id: SessionId) -> Result<SessionMachine, EngineError> {
        let Some(journal) = &self.journal else {
            return SessionMachine::load(Arc::clone(&self.store), id);
        };
        if journal.read_snapshot(id)?.is_some() {
            journal.verify_session(id)?;
        }
        let state = journal.resume(id)?;
        Ok(SessionMachine::attach(Arc::clone(&self.store), state))
    }

    async fn step(&self, id: SessionId, proposal: Proposal) -> Result<SessionView, EngineError> {
        let handle = self.session(id)?;
        let mut machine = handle.lock().await;
        let advance = self.checked(id, machine.propose(proposal))?;
        self.drive(&mut machine, advance.effects).await?;
        Ok(SessionView::of(&machine))
    }

    async fn resolve(
        &self,
        id: SessionId,
        approve: bool,
        note: String,
    ) -> Result<SessionView, EngineError> {
        let handle = self.session(id)?;
        let mut machine = handle.lock().await;
        let advance = self.checked(id, machine.resolve_approval(approve, &note))?;
        self.drive(&mut machine, advance.effects).await?;
        Ok(SessionView::of(&machine))
    }

    /// Run the executor for each requested effect and feed outcomes
    /// back until no effects remain.
    async fn drive(
        &self,
        machine: &mut SessionMachine,
        effects: Vec<EffectRequest>,
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<EffectRequest> = effects.into();
        while let Some(request) = queue.pop_front() {
            let outcome = self.executor.execute(machine.id(), &request).await;
            let advance = self.checked(
                machine.id(),
                machine.record_outcome(request.kind(), outcome),
            )?;
            queue.extend(advance.effects);
        }
        Ok(())
    }

    /// A sequence conflict means another writer got ahead of the cached
    /// machine; evict it so the next call replays fresh state.
    fn checked<T>(&self, id: SessionId, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            if err.is_retryable() {
                warn!(session = %id, %err, "evicting stale session after conflict");
                self.sessions.write().remove(&id);
            }
        }
        result
    }
}
