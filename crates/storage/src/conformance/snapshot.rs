use std::future::Future;

use postmortem_core::AnalysisStatus;

use super::{make_analysis, make_history, seed_analysis, TestResult};
use crate::{AnalysisStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "uncommitted_insert_invisible",
            uncommitted_insert_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_update_discarded",
            aborted_update_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "dropped_snapshot_discards_writes",
            dropped_snapshot_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "snapshot_reads_own_writes",
            snapshot_reads_own_writes(factory).await,
        ),
    ]
}

async fn uncommitted_insert_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .insert_analysis(&mut snap, make_analysis("a-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let visible = storage.get_analysis("a-1").await;
    let _ = storage.abort_snapshot(snap).await;
    match visible {
        Err(StorageError::NotFound { .. }) => {}
        other => return Err(format!("uncommitted insert visible: {other:?}")),
    }
    match storage.get_analysis("a-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("aborted insert visible: {other:?}")),
    }
}

async fn aborted_update_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let mut record = storage
        .get_analysis_for_update(&mut snap, "a-1")
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    record.status = AnalysisStatus::Submitted;
    storage
        .update_analysis(&mut snap, record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .append_status_history(
            &mut snap,
            make_history("a-1", 1, AnalysisStatus::Draft, AnalysisStatus::Submitted),
        )
        .await
        .map_err(|e| format!("append: {e}"))?;
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.status != AnalysisStatus::Draft || rec.version != 0 {
        return Err(format!(
            "abort leaked: status {} version {}",
            rec.status, rec.version
        ));
    }
    let history = storage
        .list_status_history("a-1")
        .await
        .map_err(|e| format!("history: {e}"))?;
    if !history.is_empty() {
        return Err(format!("abort leaked {} history entries", history.len()));
    }
    Ok(())
}

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        storage
            .insert_analysis(&mut snap, make_analysis("a-1"))
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    match storage.get_analysis("a-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("dropped snapshot leaked: {other:?}")),
    }
}

async fn snapshot_reads_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let mut record = storage
        .get_analysis_for_update(&mut snap, "a-1")
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    record.status = AnalysisStatus::Submitted;
    storage
        .update_analysis(&mut snap, record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let reread = storage
        .get_analysis_for_update(&mut snap, "a-1")
        .await
        .map_err(|e| format!("reread: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;
    if reread.status != AnalysisStatus::Submitted || reread.version != 1 {
        return Err(format!(
            "snapshot did not see its own write: status {} version {}",
            reread.status, reread.version
        ));
    }
    Ok(())
}
