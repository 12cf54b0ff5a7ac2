//! Conformance test suite for `AnalysisStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `AnalysisStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Initialization**: inserts, reads, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, aborted writes discarded
//! - **Atomic commit**: a row update and its log entries land together or not at all
//! - **Version validation / OCC**: compare-and-swap conflict detection
//! - **Audit logs**: append-only, ordered, sequence numbers never reused
//! - **Concurrency**: racing writers on one row, exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use postmortem_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod audit;
mod commit;
mod concurrent;
mod init;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use postmortem_core::{AnalysisContent, AnalysisStatus, AnalysisType, Role, TaskStatus, TransitionEvent};

use crate::record::{
    AnalysisRecord, ChainHead, ReportRecord, RevisionRecord, StatusHistoryRecord, TaskRecord,
    GENESIS_HASH,
};
use crate::AnalysisStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_analysis_visible_after_commit").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: result.is_ok(),
            message: result.err(),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(audit::run_audit_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_task(id: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: format!("Investigate {}", id),
        description: "checkout latency regression".to_string(),
        created_by: "manager-1".to_string(),
        assignee: Some("employee-1".to_string()),
        status: TaskStatus::Open,
        version: 0,
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

fn make_analysis(id: &str) -> AnalysisRecord {
    AnalysisRecord {
        id: id.to_string(),
        task_id: "task-1".to_string(),
        owner_id: "employee-1".to_string(),
        analysis_type: AnalysisType::Latency,
        status: AnalysisStatus::Draft,
        content: AnalysisContent::default(),
        feedback: None,
        version: 0,
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
        history_head: ChainHead::genesis(),
        revision_head: ChainHead::genesis(),
    }
}

fn make_history(
    analysis_id: &str,
    sequence: u64,
    from: AnalysisStatus,
    to: AnalysisStatus,
) -> StatusHistoryRecord {
    StatusHistoryRecord {
        id: format!("{}-h{}", analysis_id, sequence),
        analysis_id: analysis_id.to_string(),
        sequence,
        from_status: from,
        to_status: to,
        event: TransitionEvent::Submit,
        actor_id: "employee-1".to_string(),
        actor_role: Role::Employee,
        revision: 1,
        note: None,
        recorded_at: "2025-01-01T00:01:00Z".to_string(),
        prev_hash: GENESIS_HASH.to_string(),
        hash: format!("{:064}", sequence),
    }
}

fn make_revision(analysis_id: &str, sequence: u64) -> RevisionRecord {
    RevisionRecord {
        id: format!("{}-r{}", analysis_id, sequence),
        analysis_id: analysis_id.to_string(),
        sequence,
        content: AnalysisContent::default(),
        actor_id: "employee-1".to_string(),
        recorded_at: "2025-01-01T00:01:00Z".to_string(),
        prev_hash: GENESIS_HASH.to_string(),
        hash: format!("{:064}", sequence),
    }
}

fn make_report(id: &str, analysis_id: &str) -> ReportRecord {
    ReportRecord {
        id: id.to_string(),
        analysis_id: analysis_id.to_string(),
        summary: "Root cause: connection pool exhaustion".to_string(),
        generated_by: "manager-1".to_string(),
        created_at: "2025-01-02T00:00:00Z".to_string(),
    }
}

/// Insert and commit a fresh analysis at version 0.
async fn seed_analysis<S: AnalysisStorage>(storage: &S, id: &str) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_analysis(&mut snap, make_analysis(id))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit seed: {e}"))
}

/// Move a committed analysis to `status` in its own snapshot.
async fn commit_status<S: AnalysisStorage>(
    storage: &S,
    id: &str,
    expected_version: i64,
    status: AnalysisStatus,
) -> Result<i64, String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let mut record = storage
        .get_analysis_for_update(&mut snap, id)
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    record.status = status;
    let version = storage
        .update_analysis(&mut snap, record, expected_version)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    Ok(version)
}
