//! Append-only event stores.
//!
//! Records carry a SHA-256 chain: each hash covers the record's own
//! fields plus the previous record's hash, so any splice or edit in a
//! persisted log surfaces as [`EngineError::Corrupt`] on read. Stores
//! enforce the per-session sequence contract: an append whose `seq` is
//! not exactly `last + 1` fails with `ConcurrentSequenceConflict` and
//! writes nothing.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::EngineError;
use crate::event::{EventRecord, SessionId};
use crate::reducer::{self, SessionState};

/// Storage contract the session machine writes through.
pub trait EventStore: Send + Sync {
    /// Append one record. The store assigns `prev_hash`/`hash`; the
    /// record's `seq` must be exactly one past the session's last.
    fn append(&self, record: EventRecord) -> Result<EventRecord, EngineError>;

    /// Full ordered log for a session; empty if the session is unknown.
    fn read_all(&self, session: SessionId) -> Result<Vec<EventRecord>, EngineError>;

    /// Last appended sequence, 0 for an unknown session.
    fn last_seq(&self, session: SessionId) -> Result<u64, EngineError>;

    /// All sessions the store knows about.
    fn sessions(&self) -> Result<Vec<SessionId>, EngineError>;
}

fn compute_hash(record: &EventRecord) -> Result<[u8; 32], EngineError> {
    let payload = serde_json::to_vec(&record.event)
        .map_err(|e| EngineError::Corrupt(format!("unserializable event: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(record.session_id.0.as_bytes());
    hasher.update(record.seq.to_le_bytes());
    hasher.update(record.ts_ms.to_le_bytes());
    hasher.update(&payload);
    hasher.update(record.prev_hash);
    Ok(hasher.finalize().into())
}

fn chain(record: &mut EventRecord, prev_hash: [u8; 32]) -> Result<(), EngineError> {
    record.prev_hash = prev_hash;
    record.hash = compute_hash(record)?;
    Ok(())
}

fn verify_chain(session: SessionId, records: &[EventRecord]) -> Result<(), EngineError> {
    let mut prev = [0u8; 32];
    for (i, record) in records.iter().enumerate() {
        if record.session_id != session {
            return Err(EngineError::Corrupt(format!(
                "record {} belongs to session {}",
                i, record.session_id
            )));
        }
        if record.seq != (i as u64) + 1 {
            return Err(EngineError::Corrupt(format!(
                "sequence gap at index {i}: got seq {}",
                record.seq
            )));
        }
        if record.prev_hash != prev {
            return Err(EngineError::Corrupt(format!(
                "hash chain broken before seq {}",
                record.seq
            )));
        }
        if record.hash != compute_hash(record)? {
            return Err(EngineError::Corrupt(format!(
                "record hash mismatch at seq {}",
                record.seq
            )));
        }
        prev = record.hash;
    }
    Ok(())
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<SessionId, Vec<EventRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryStore {
    fn append(&self, mut record: EventRecord) -> Result<EventRecord, EngineError> {
        let mut map = self.inner.write();
        let log = map.entry(record.session_id).or_default();
        let expected = (log.len() as u64) + 1;
        if record.seq != expected {
            return Err(EngineError::ConcurrentSequenceConflict {
                session: record.session_id,
                expected,
                got: record.seq,
            });
        }
        let prev = log.last().map(|r| r.hash).unwrap_or([0u8; 32]);
        chain(&mut record, prev)?;
        log.push(record.clone());
        Ok(record)
    }

    fn read_all(&self, session: SessionId) -> Result<Vec<EventRecord>, EngineError> {
        Ok(self.inner.read().get(&session).cloned().unwrap_or_default())
    }

    fn last_seq(&self, session: SessionId) -> Result<u64, EngineError> {
        Ok(self
            .inner
            .read()
            .get(&session)
            .map(|log| log.len() as u64)
            .unwrap_or(0))
    }

    fn sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        Ok(self.inner.read().keys().copied().collect())
    }
}

const SNAPSHOT_VERSION: u32 = 1;

/// Point-in-time checkpoint of a session state, for bounded replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub seq: u64,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy)]
struct Tail {
    last_seq: u64,
    last_hash: [u8; 32],
}

/// Durable store: one JSON Lines file per session under a journal
/// directory, plus optional snapshot files alongside.
pub struct JournalStore {
    root: PathBuf,
    tails: Mutex<HashMap<SessionId, Tail>>,
}

impl JournalStore {
    /// Open (creating if needed) a journal directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tails: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self, session: SessionId) -> PathBuf {
        self.root.join(format!("{session}.jsonl"))
    }

    fn snapshot_path(&self, session: SessionId) -> PathBuf {
        self.root.join(format!("{session}.snapshot.json"))
    }

    fn read_log(&self, session: SessionId) -> Result<Vec<EventRecord>, EngineError> {
        let path = self.log_path(session);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)?;
        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(&line).map_err(|e| {
                EngineError::Corrupt(format!("unparseable journal line {}: {e}", i + 1))
            })?;
            records.push(record);
        }
        verify_chain(session, &records)?;
        Ok(records)
    }

    fn tail_of(
        &self,
        tails: &mut HashMap<SessionId, Tail>,
        session: SessionId,
    ) -> Result<Tail, EngineError> {
        if let Some(tail) = tails.get(&session) {
            return Ok(*tail);
        }
        let records = self.read_log(session)?;
        let tail = Tail {
            last_seq: records.len() as u64,
            last_hash: records.last().map(|r| r.hash).unwrap_or([0u8; 32]),
        };
        tails.insert(session, tail);
        Ok(tail)
    }

    /// Write a checkpoint of `state` at its current sequence. Written to
    /// a temp file and renamed so a crash never leaves a torn snapshot.
    pub fn write_snapshot(&self, state: &SessionState) -> Result<(), EngineError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            seq: state.last_seq,
            state: state.clone(),
        };
        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| EngineError::Corrupt(format!("unserializable snapshot: {e}")))?;
        let path = self.snapshot_path(state.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        debug!(session = %state.id, seq = snapshot.seq, "snapshot written");
        Ok(())
    }

    /// Load a usable snapshot, if one exists. A snapshot with an
    /// unknown version is ignored rather than trusted.
    pub fn read_snapshot(&self, session: SessionId) -> Result<Option<Snapshot>, EngineError> {
        let path = self.snapshot_path(session);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read(&path)?;
        let snapshot: Snapshot = serde_json::from_slice(&body)
            .map_err(|e| EngineError::Corrupt(format!("unparseable snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            debug!(session = %session, version = snapshot.version, "ignoring snapshot with unknown version");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Rebuild a session state, folding only the log tail past the
    /// snapshot when one is available.
    pub fn resume(&self, session: SessionId) -> Result<SessionState, EngineError> {
        let records = self.read_log(session)?;
        if records.is_empty() {
            return Err(EngineError::SessionNotFound(session));
        }
        match self.read_snapshot(session)? {
            Some(snapshot) if snapshot.seq <= records.len() as u64 => {
                let tail = &records[snapshot.seq as usize..];
                reducer::replay_from(snapshot.state, tail)
            }
            // A snapshot ahead of the log means the log was truncated.
            Some(snapshot) => Err(EngineError::ReplayDivergence {
                session,
                seq: snapshot.seq,
            }),
            None => reducer::replay(session, &records),
        }
    }

    /// Audit a session: hash chain, full replay, and agreement between
    /// the replayed state and any persisted snapshot.
    pub fn verify_session(&self, session: SessionId) -> Result<(), EngineError> {
        let records = self.read_log(session)?;
        let state = reducer::replay(session, &records)?;
        if let Some(snapshot) = self.read_snapshot(session)? {
            let upto = &records[..(snapshot.seq.min(records.len() as u64)) as usize];
            let replayed = reducer::replay(session, upto)?;
            if replayed != snapshot.state {
                return Err(EngineError::ReplayDivergence {
                    session,
                    seq: snapshot.seq,
                });
            }
        }
        debug!(session = %session, seq = state.last_seq, "session verified");
        Ok(())
    }
}

impl EventStore for JournalStore {
    fn append(&self, mut record: EventRecord) -> Result<EventRecord, EngineError> {
        let mut tails = self.tails.lock();
        let tail = self.tail_of(&mut tails, record.session_id)?;
        if record.seq != tail.last_seq + 1 {
            return Err(EngineError::ConcurrentSequenceConflict {
                session: record.session_id,
                expected: tail.last_seq + 1,
                got: record.seq,
            });
        }
        chain(&mut record, tail.last_hash)?;

        let line = serde_json::to_string(&record)
            .map_err(|e| EngineError::Corrupt(format!("unserializable record: {e}")))?;
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(self.log_path(record.session_id))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;

        tails.insert(
            record.session_id,
            Tail {
                last_seq: record.seq,
                last_hash: record.hash,
            },
        );
        Ok(record)
    }

    fn read_all(&self, session: SessionId) -> Result<Vec<EventRecord>, EngineError> {
        self.read_log(session)
    }

    fn last_seq(&self, session: SessionId) -> Result<u64, EngineError> {
        let mut tails = self.tails.lock();
        Ok(self.tail_of(&mut tails, session)?.last_seq)
    }

    fn sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".jsonl") {
                if let Ok(uuid) = stem.parse() {
                    out.push(SessionId(uuid));
                }
            }
        }
        Ok(out)
    }
}
