use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    AnalysisFilter, AnalysisRecord, ReportRecord, RevisionRecord, StatusHistoryRecord, TaskRecord,
};

/// The persistence contract the workflow engine is written against.
///
/// An `AnalysisStorage` implementation provides transactional storage for
/// tasks, analyses, their append-only status history and revision logs, and
/// generated reports.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, none of its writes may
/// become visible. A row update and the log entries describing it are always
/// written in the same snapshot, so they commit or fail together.
///
/// ## OCC Conflict Detection
///
/// `update_analysis` and `update_task` are compare-and-swap writes:
/// `UPDATE ... WHERE version = expected_version`. A mismatch, detected either
/// at the call or at commit, returns `Err(StorageError::Conflict { .. })` and
/// nothing from the snapshot is applied.
///
/// ## Append-only Logs
///
/// Status history and revision entries are keyed by `(analysis_id, sequence)`.
/// There are no update or delete methods for them. Re-using a sequence number
/// returns `Err(StorageError::AlreadyExists)`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait AnalysisStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all of its writes visible at once.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all of its writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Tasks (within snapshot) ───────────────────────────────────────────────

    /// Insert a new task. Returns `AlreadyExists` if the id is taken.
    async fn insert_task(
        &self,
        snapshot: &mut Self::Snapshot,
        record: TaskRecord,
    ) -> Result<(), StorageError>;

    /// Read a task as seen by this snapshot (including its own writes).
    async fn get_task_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        task_id: &str,
    ) -> Result<TaskRecord, StorageError>;

    /// Version-validated task update. Returns the new version.
    async fn update_task(
        &self,
        snapshot: &mut Self::Snapshot,
        record: TaskRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Analyses (within snapshot) ────────────────────────────────────────────

    /// Insert a new analysis at the version carried by `record` (normally 0).
    async fn insert_analysis(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AnalysisRecord,
    ) -> Result<(), StorageError>;

    /// Read an analysis as seen by this snapshot (including its own writes).
    async fn get_analysis_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, StorageError>;

    /// Version-validated analysis update (OCC).
    ///
    /// Stores `record` with `version = expected_version + 1` and returns the
    /// new version. The caller's `record.version` is ignored.
    async fn update_analysis(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AnalysisRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Append a status history entry. The analysis must exist.
    async fn append_status_history(
        &self,
        snapshot: &mut Self::Snapshot,
        record: StatusHistoryRecord,
    ) -> Result<(), StorageError>;

    /// Append a revision entry. The analysis must exist.
    async fn append_revision(
        &self,
        snapshot: &mut Self::Snapshot,
        record: RevisionRecord,
    ) -> Result<(), StorageError>;

    /// Insert a generated report. The analysis must exist.
    async fn insert_report(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError>;

    // ── Queries (committed state only) ────────────────────────────────────────

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, StorageError>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StorageError>;

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRecord, StorageError>;

    /// Analyses matching `filter`, oldest first.
    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
    ) -> Result<Vec<AnalysisRecord>, StorageError>;

    /// Status history of an analysis in sequence order.
    async fn list_status_history(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<StatusHistoryRecord>, StorageError>;

    /// Revisions of an analysis in sequence order.
    async fn list_revisions(&self, analysis_id: &str)
        -> Result<Vec<RevisionRecord>, StorageError>;

    /// Reports, optionally restricted to one analysis, oldest first.
    async fn list_reports(
        &self,
        analysis_id: Option<&str>,
    ) -> Result<Vec<ReportRecord>, StorageError>;
}
