use postmortem_core::{
    AnalysisContent, AnalysisStatus, AnalysisType, Role, TaskStatus, TransitionEvent,
};
use serde::{Deserialize, Serialize};

/// Previous-hash value of the first entry in every audit chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Position of the newest entry in one of an analysis's audit chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence number of the newest entry; 0 when the chain is empty.
    pub sequence: u64,
    /// Hash of the newest entry, or [`GENESIS_HASH`].
    pub hash: String,
}

impl ChainHead {
    pub fn genesis() -> Self {
        ChainHead {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}

/// An analysis row as stored in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub task_id: String,
    pub owner_id: String,
    pub analysis_type: AnalysisType,
    pub status: AnalysisStatus,
    pub content: AnalysisContent,
    /// Reviewer rationale from the most recent review, if any.
    pub feedback: Option<String>,
    pub version: i64,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string.
    pub updated_at: String,
    pub history_head: ChainHead,
    pub revision_head: ChainHead,
}

/// One immutable entry of an analysis's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryRecord {
    pub id: String,
    pub analysis_id: String,
    /// 1-based, contiguous per analysis.
    pub sequence: u64,
    pub from_status: AnalysisStatus,
    pub to_status: AnalysisStatus,
    pub event: TransitionEvent,
    pub actor_id: String,
    pub actor_role: Role,
    /// Revision number of the content in force when the transition happened.
    pub revision: u64,
    pub note: Option<String>,
    /// RFC 3339 timestamp string.
    pub recorded_at: String,
    pub prev_hash: String,
    pub hash: String,
}

/// One immutable content snapshot of an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: String,
    pub analysis_id: String,
    /// Revision number, 1-based and contiguous per analysis.
    pub sequence: u64,
    pub content: AnalysisContent,
    pub actor_id: String,
    /// RFC 3339 timestamp string.
    pub recorded_at: String,
    pub prev_hash: String,
    pub hash: String,
}

/// A task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_by: String,
    pub assignee: Option<String>,
    pub status: TaskStatus,
    pub version: i64,
    /// RFC 3339 timestamp string.
    pub created_at: String,
    /// RFC 3339 timestamp string.
    pub updated_at: String,
}

/// An executive report generated from an approved analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub analysis_id: String,
    pub summary: String,
    pub generated_by: String,
    /// RFC 3339 timestamp string.
    pub created_at: String,
}

/// Optional filters for [`crate::AnalysisStorage::list_analyses`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisFilter {
    pub owner_id: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<AnalysisStatus>,
}

impl AnalysisFilter {
    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        self.owner_id
            .as_deref()
            .map_or(true, |owner| record.owner_id == owner)
            && self
                .task_id
                .as_deref()
                .map_or(true, |task| record.task_id == task)
            && self.status.map_or(true, |status| record.status == status)
    }
}
