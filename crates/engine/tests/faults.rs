//! Behaviour under backend failures and tampered logs.
//!
//! `FaultyStorage` wraps the in-memory backend and can be told to fail a
//! particular write or to corrupt what it reads back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use postmortem_core::{AnalysisStatus, AnalysisType, ContentDraft, ErrorKind, ReviewDecision, Role};
use postmortem_engine::{
    Actor, AuditError, AuditLog, ManualClock, NewAnalysis, NewTask, SequentialIds, Workflow,
};
use postmortem_storage::{
    AnalysisFilter, AnalysisRecord, AnalysisStorage, MemorySnapshot, MemoryStorage, ReportRecord,
    RevisionRecord, StatusHistoryRecord, StorageError, TaskRecord,
};

#[derive(Default)]
struct FaultyStorage {
    inner: MemoryStorage,
    fail_history_append: AtomicBool,
    fail_commit: AtomicBool,
    fail_abort: AtomicBool,
    tamper_history: AtomicBool,
    drop_last_revision: AtomicBool,
}

fn injected(what: &str) -> StorageError {
    StorageError::Backend(format!("injected failure: {}", what))
}

#[async_trait]
impl AnalysisStorage for FaultyStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        self.inner.begin_snapshot().await
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(injected("commit"));
        }
        self.inner.commit_snapshot(snapshot).await
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        if self.fail_abort.load(Ordering::SeqCst) {
            drop(snapshot);
            return Err(injected("abort"));
        }
        self.inner.abort_snapshot(snapshot).await
    }

    async fn insert_task(
        &self,
        snapshot: &mut MemorySnapshot,
        record: TaskRecord,
    ) -> Result<(), StorageError> {
        self.inner.insert_task(snapshot, record).await
    }

    async fn get_task_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        task_id: &str,
    ) -> Result<TaskRecord, StorageError> {
        self.inner.get_task_for_update(snapshot, task_id).await
    }

    async fn update_task(
        &self,
        snapshot: &mut MemorySnapshot,
        record: TaskRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        self.inner.update_task(snapshot, record, expected_version).await
    }

    async fn insert_analysis(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AnalysisRecord,
    ) -> Result<(), StorageError> {
        self.inner.insert_analysis(snapshot, record).await
    }

    async fn get_analysis_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        analysis_id: &str,
    ) -> Result<AnalysisRecord, StorageError> {
        self.inner.get_analysis_for_update(snapshot, analysis_id).await
    }

    async fn update_analysis(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AnalysisRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        self.inner
            .update_analysis(snapshot, record, expected_version)
            .await
    }

    async fn append_status_history(
        &self,
        snapshot: &mut MemorySnapshot,
        record: StatusHistoryRecord,
    ) -> Result<(), StorageError> {
        if self.fail_history_append.load(Ordering::SeqCst) {
            return Err(injected("append_status_history"));
        }
        self.inner.append_status_history(snapshot, record).await
    }

    async fn append_revision(
        &self,
        snapshot: &mut MemorySnapshot,
        record: RevisionRecord,
    ) -> Result<(), StorageError> {
        self.inner.append_revision(snapshot, record).await
    }

    async fn insert_report(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ReportRecord,
    ) -> Result<(), StorageError> {
        self.inner.insert_report(snapshot, record).await
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskRecord, StorageError> {
        self.inner.get_task(task_id).await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StorageError> {
        self.inner.list_tasks().await
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRecord, StorageError> {
        self.inner.get_analysis(analysis_id).await
    }

    async fn list_analyses(
        &self,
        filter: &AnalysisFilter,
    ) -> Result<Vec<AnalysisRecord>, StorageError> {
        self.inner.list_analyses(filter).await
    }

    async fn list_status_history(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<StatusHistoryRecord>, StorageError> {
        let mut entries = self.inner.list_status_history(analysis_id).await?;
        if self.tamper_history.load(Ordering::SeqCst) {
            if let Some(first) = entries.first_mut() {
                first.actor_id = "mallory".into();
            }
        }
        Ok(entries)
    }

    async fn list_revisions(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<RevisionRecord>, StorageError> {
        let mut entries = self.inner.list_revisions(analysis_id).await?;
        if self.drop_last_revision.load(Ordering::SeqCst) {
            entries.pop();
        }
        Ok(entries)
    }

    async fn list_reports(
        &self,
        analysis_id: Option<&str>,
    ) -> Result<Vec<ReportRecord>, StorageError> {
        self.inner.list_reports(analysis_id).await
    }
}

fn alice() -> Actor {
    Actor::new("alice", Role::Employee)
}

fn bob() -> Actor {
    Actor::new("bob", Role::Manager)
}

fn draft(readiness: i64) -> ContentDraft {
    serde_json::from_value(json!({
        "symptoms": ["Users saw 502s"],
        "readiness_score": readiness
    }))
    .unwrap()
}

async fn setup() -> (Arc<FaultyStorage>, Workflow<FaultyStorage>, AnalysisRecord) {
    let storage = Arc::new(FaultyStorage::default());
    let wf = Workflow::new(
        Arc::clone(&storage),
        Arc::new(ManualClock::default()),
        Arc::new(SequentialIds::new()),
    );
    let task = wf
        .tasks
        .create_task(
            &bob(),
            NewTask {
                title: "Edge outage".into(),
                description: String::new(),
                assignee: None,
            },
        )
        .await
        .unwrap();
    let analysis = wf
        .analyses
        .create(
            &alice(),
            NewAnalysis {
                task_id: task.id,
                analysis_type: AnalysisType::Outage,
                content: Some(draft(80)),
            },
        )
        .await
        .unwrap();
    (storage, wf, analysis)
}

#[tokio::test]
async fn failed_history_append_leaves_the_row_untouched() {
    let (storage, wf, a) = setup().await;
    storage.fail_history_append.store(true, Ordering::SeqCst);

    let err = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);

    let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Draft);
    assert_eq!(stored.version, a.version);
    assert!(wf.analyses.history(&alice(), &a.id).await.unwrap().is_empty());

    // The same token still works once the backend recovers.
    storage.fail_history_append.store(false, Ordering::SeqCst);
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    assert_eq!(a.status, AnalysisStatus::Submitted);
}

#[tokio::test]
async fn failed_reentry_edit_writes_neither_revision_nor_status() {
    let (storage, wf, a) = setup().await;
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    let a = wf
        .analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Reject, Some("no timeline"))
        .await
        .unwrap();

    storage.fail_history_append.store(true, Ordering::SeqCst);
    let err = wf
        .analyses
        .update_content(&alice(), &a.id, a.version, draft(95))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);

    let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Rejected);
    assert_eq!(stored.content.readiness_score.value(), 80);
    assert_eq!(wf.analyses.revisions(&alice(), &a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn commit_failure_is_infrastructure_not_conflict() {
    let (storage, wf, a) = setup().await;
    storage.fail_commit.store(true, Ordering::SeqCst);
    let err = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);

    storage.fail_commit.store(false, Ordering::SeqCst);
    let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Draft);
}

#[tokio::test]
async fn tampered_history_is_reported() {
    let (storage, wf, a) = setup().await;
    let a = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap();
    wf.analyses
        .review(&bob(), &a.id, a.version, ReviewDecision::Approve, None)
        .await
        .unwrap();
    assert!(wf.analyses.verify_audit(&bob(), &a.id).await.unwrap().is_intact());

    storage.tamper_history.store(true, Ordering::SeqCst);
    let report = wf.analyses.verify_audit(&bob(), &a.id).await.unwrap();
    assert_eq!(
        report.first_break,
        Some(AuditError::HashMismatch {
            log: AuditLog::StatusHistory,
            sequence: 1,
        })
    );
}

#[tokio::test]
async fn truncated_revisions_are_reported() {
    let (storage, wf, a) = setup().await;
    wf.analyses
        .update_content(&alice(), &a.id, a.version, draft(90))
        .await
        .unwrap();

    storage.drop_last_revision.store(true, Ordering::SeqCst);
    let report = wf.analyses.verify_audit(&alice(), &a.id).await.unwrap();
    assert!(!report.is_intact());
    assert_eq!(report.revision_entries, 1);
    assert_eq!(
        report.first_break,
        Some(AuditError::SequenceGap {
            log: AuditLog::Revisions,
            expected: 2,
            found: None,
        })
    );
}

#[tokio::test]
async fn failed_abort_keeps_the_original_error() {
    let (storage, wf, a) = setup().await;
    storage.fail_abort.store(true, Ordering::SeqCst);

    let err = wf.analyses.submit(&bob(), &a.id, a.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    storage.fail_history_append.store(true, Ordering::SeqCst);
    let err = wf.analyses.submit(&alice(), &a.id, a.version).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert!(err.to_string().contains("append_status_history"), "{err}");

    storage.fail_abort.store(false, Ordering::SeqCst);
    storage.fail_history_append.store(false, Ordering::SeqCst);
    let stored = wf.analyses.get(&alice(), &a.id).await.unwrap();
    assert_eq!(stored.status, AnalysisStatus::Draft);
    assert_eq!(stored.version, a.version);
}
