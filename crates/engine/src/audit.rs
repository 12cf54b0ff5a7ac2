//! Hash-chained status history and revision logs.
//!
//! Each entry's hash is `SHA-256(prev_hash || body)`, hex encoded, where
//! `body` is the JSON encoding of the entry without its id and hash fields,
//! in declaration order. The first entry of a chain links to
//! [`GENESIS_HASH`]. The analysis row carries the head of both chains and is
//! written in the same snapshot as every append, so truncating a log or
//! editing an entry is detectable from the row alone.

use serde::Serialize;
use sha2::{Digest, Sha256};

use postmortem_core::{AnalysisContent, AnalysisStatus, EngineError, Role, TransitionEvent};
use postmortem_storage::{ChainHead, RevisionRecord, StatusHistoryRecord, GENESIS_HASH};

/// Which of an analysis's two logs an [`AuditError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLog {
    StatusHistory,
    Revisions,
}

impl std::fmt::Display for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditLog::StatusHistory => f.write_str("status history"),
            AuditLog::Revisions => f.write_str("revisions"),
        }
    }
}

/// The first broken link found while re-walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditError {
    /// The stored hash does not match the recomputed one: the entry was edited.
    #[error("{log} entry {sequence}: stored hash does not match its contents")]
    HashMismatch { log: AuditLog, sequence: u64 },

    /// The entry does not link to its predecessor, or the row's chain head
    /// does not match the last entry.
    #[error("{log} entry {sequence}: link to the previous entry is broken")]
    ChainBroken { log: AuditLog, sequence: u64 },

    /// Entries are missing or out of order. `found` is `None` when the log
    /// ends before the sequence the row's chain head records.
    #[error("{log}: expected entry {expected}, found {}", describe_found(.found))]
    SequenceGap {
        log: AuditLog,
        expected: u64,
        found: Option<u64>,
    },
}

fn describe_found(found: &Option<u64>) -> String {
    match found {
        Some(sequence) => sequence.to_string(),
        None => "end of log".to_string(),
    }
}

/// Outcome of [`verify_history`] and [`verify_revisions`] for one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub analysis_id: String,
    pub history_entries: usize,
    pub revision_entries: usize,
    pub first_break: Option<AuditError>,
}

impl AuditReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

#[derive(Serialize)]
struct HistoryBody<'a> {
    analysis_id: &'a str,
    sequence: u64,
    from_status: AnalysisStatus,
    to_status: AnalysisStatus,
    event: TransitionEvent,
    actor_id: &'a str,
    actor_role: Role,
    revision: u64,
    note: Option<&'a str>,
    recorded_at: &'a str,
}

#[derive(Serialize)]
struct RevisionBody<'a> {
    analysis_id: &'a str,
    sequence: u64,
    content: &'a AnalysisContent,
    actor_id: &'a str,
    recorded_at: &'a str,
}

/// A log entry that participates in a hash chain.
trait Chained {
    fn sequence(&self) -> u64;
    fn prev_hash(&self) -> &str;
    fn hash(&self) -> &str;
    fn body(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl Chained for StatusHistoryRecord {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&HistoryBody {
            analysis_id: &self.analysis_id,
            sequence: self.sequence,
            from_status: self.from_status,
            to_status: self.to_status,
            event: self.event,
            actor_id: &self.actor_id,
            actor_role: self.actor_role,
            revision: self.revision,
            note: self.note.as_deref(),
            recorded_at: &self.recorded_at,
        })
    }
}

impl Chained for RevisionRecord {
    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&RevisionBody {
            analysis_id: &self.analysis_id,
            sequence: self.sequence,
            content: &self.content,
            actor_id: &self.actor_id,
            recorded_at: &self.recorded_at,
        })
    }
}

/// `hex(SHA-256(prev_hash || body))`
pub fn chain_hash(prev_hash: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn encode_err(e: serde_json::Error) -> EngineError {
    EngineError::Infrastructure {
        message: format!("cannot encode audit entry: {}", e),
    }
}

/// Link `entry` onto the chain ending at `head`: assigns its sequence,
/// previous hash, and hash. Returns the new head.
pub fn seal_history(
    entry: &mut StatusHistoryRecord,
    head: &ChainHead,
) -> Result<ChainHead, EngineError> {
    entry.sequence = head.sequence + 1;
    entry.prev_hash = head.hash.clone();
    let body = entry.body().map_err(encode_err)?;
    entry.hash = chain_hash(&entry.prev_hash, &body);
    Ok(ChainHead {
        sequence: entry.sequence,
        hash: entry.hash.clone(),
    })
}

/// Revision counterpart of [`seal_history`].
pub fn seal_revision(entry: &mut RevisionRecord, head: &ChainHead) -> Result<ChainHead, EngineError> {
    entry.sequence = head.sequence + 1;
    entry.prev_hash = head.hash.clone();
    let body = entry.body().map_err(encode_err)?;
    entry.hash = chain_hash(&entry.prev_hash, &body);
    Ok(ChainHead {
        sequence: entry.sequence,
        hash: entry.hash.clone(),
    })
}

pub fn verify_history(entries: &[StatusHistoryRecord], head: &ChainHead) -> Result<(), AuditError> {
    verify_chain(AuditLog::StatusHistory, entries, head)
}

pub fn verify_revisions(entries: &[RevisionRecord], head: &ChainHead) -> Result<(), AuditError> {
    verify_chain(AuditLog::Revisions, entries, head)
}

fn verify_chain<T: Chained>(
    log: AuditLog,
    entries: &[T],
    head: &ChainHead,
) -> Result<(), AuditError> {
    let mut prev = GENESIS_HASH.to_string();
    let mut expected = 1u64;
    for entry in entries {
        let sequence = entry.sequence();
        if sequence != expected {
            return Err(AuditError::SequenceGap {
                log,
                expected,
                found: Some(sequence),
            });
        }
        if entry.prev_hash() != prev {
            return Err(AuditError::ChainBroken { log, sequence });
        }
        let recomputed = entry
            .body()
            .map(|body| chain_hash(entry.prev_hash(), &body));
        if recomputed.as_deref().ok() != Some(entry.hash()) {
            return Err(AuditError::HashMismatch { log, sequence });
        }
        prev = entry.hash().to_string();
        expected += 1;
    }

    let last = expected - 1;
    if head.sequence > last {
        return Err(AuditError::SequenceGap {
            log,
            expected,
            found: None,
        });
    }
    if head.sequence < last || head.hash != prev {
        return Err(AuditError::ChainBroken {
            log,
            sequence: head.sequence,
        });
    }
    Ok(())
}
