use std::future::Future;

use postmortem_core::{AnalysisStatus, TaskStatus};

use super::{commit_status, make_task, seed_analysis, TestResult};
use crate::{AnalysisStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "matching_version_increments",
            matching_version_increments(factory).await,
        ),
        TestResult::from_result(
            "version",
            "wrong_version_conflicts",
            wrong_version_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_version_after_commit_conflicts",
            stale_version_after_commit_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_leaves_row_untouched",
            conflict_leaves_row_untouched(factory).await,
        ),
        TestResult::from_result(
            "version",
            "second_of_two_snapshots_conflicts",
            second_of_two_snapshots_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "task_update_is_versioned",
            task_update_is_versioned(factory).await,
        ),
    ]
}

async fn matching_version_increments<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    let v1 = commit_status(&storage, "a-1", 0, AnalysisStatus::Submitted).await?;
    let v2 = commit_status(&storage, "a-1", 1, AnalysisStatus::Rejected).await?;
    if (v1, v2) != (1, 2) {
        return Err(format!("expected versions (1, 2), got ({v1}, {v2})"));
    }
    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.version != 2 {
        return Err(format!("stored version {} != 2", rec.version));
    }
    Ok(())
}

async fn wrong_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let record = storage
        .get_analysis_for_update(&mut snap, "a-1")
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    let result = storage.update_analysis(&mut snap, record, 7).await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::Conflict {
            expected_version: 7,
            actual_version: Some(0),
            ..
        }) => Ok(()),
        other => Err(format!("expected Conflict(7 vs 0), got {other:?}")),
    }
}

async fn stale_version_after_commit_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    commit_status(&storage, "a-1", 0, AnalysisStatus::Submitted).await?;
    match commit_status(&storage, "a-1", 0, AnalysisStatus::Approved).await {
        Err(msg) if msg.contains("conflict") || msg.contains("Conflict") => Ok(()),
        Err(msg) => Err(format!("expected a conflict, got: {msg}")),
        Ok(v) => Err(format!("stale write succeeded with version {v}")),
    }
}

async fn conflict_leaves_row_untouched<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    let before = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    let _ = commit_status(&storage, "a-1", 3, AnalysisStatus::Approved).await;
    let after = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if before != after {
        return Err("failed CAS mutated the stored row".into());
    }
    Ok(())
}

/// Two snapshots read the same version; both stage an update. Whichever
/// commits second must be refused.
async fn second_of_two_snapshots_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;

    let mut first = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin first: {e}"))?;
    let mut second = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin second: {e}"))?;

    let mut a = storage
        .get_analysis_for_update(&mut first, "a-1")
        .await
        .map_err(|e| format!("read first: {e}"))?;
    let mut b = storage
        .get_analysis_for_update(&mut second, "a-1")
        .await
        .map_err(|e| format!("read second: {e}"))?;
    a.status = AnalysisStatus::Submitted;
    b.status = AnalysisStatus::Rejected;

    storage
        .update_analysis(&mut first, a, 0)
        .await
        .map_err(|e| format!("stage first: {e}"))?;
    let staged_second = storage.update_analysis(&mut second, b, 0).await;

    storage
        .commit_snapshot(first)
        .await
        .map_err(|e| format!("commit first: {e}"))?;

    let outcome = match staged_second {
        Ok(_) => storage.commit_snapshot(second).await,
        Err(e) => {
            let _ = storage.abort_snapshot(second).await;
            Err(e)
        }
    };
    match outcome {
        Err(StorageError::Conflict { .. }) => {}
        other => return Err(format!("second commit: expected Conflict, got {other:?}")),
    }
    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.status != AnalysisStatus::Submitted {
        return Err(format!("expected first writer's status, got {}", rec.status));
    }
    Ok(())
}

async fn task_update_is_versioned<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_task(&mut snap, make_task("task-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let mut task = storage
        .get_task_for_update(&mut snap, "task-1")
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    task.status = TaskStatus::InProgress;
    let stale = storage.update_task(&mut snap, task.clone(), 4).await;
    if !matches!(stale, Err(StorageError::Conflict { .. })) {
        let _ = storage.abort_snapshot(snap).await;
        return Err(format!("stale task update: expected Conflict, got {stale:?}"));
    }
    let version = storage
        .update_task(&mut snap, task, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = storage
        .get_task("task-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if version != 1 || stored.version != 1 || stored.status != TaskStatus::InProgress {
        return Err(format!(
            "expected version 1 IN_PROGRESS, got {} {}",
            stored.version, stored.status
        ));
    }
    Ok(())
}
