use std::future::Future;

use postmortem_core::AnalysisStatus;

use super::{make_history, make_revision, seed_analysis, TestResult};
use crate::{AnalysisStorage, StorageError};

pub(super) async fn run_audit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "audit",
            "history_returned_in_sequence_order",
            history_returned_in_sequence_order(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "history_sequence_never_reused",
            history_sequence_never_reused(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "revision_sequence_never_reused",
            revision_sequence_never_reused(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "append_for_missing_analysis_not_found",
            append_for_missing_analysis_not_found(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "logs_are_per_analysis",
            logs_are_per_analysis(factory).await,
        ),
    ]
}

async fn history_returned_in_sequence_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;

    // Committed out of order across two snapshots.
    for batch in [[2u64, 3], [1, 4]] {
        let mut snap = storage
            .begin_snapshot()
            .await
            .map_err(|e| format!("begin: {e}"))?;
        for seq in batch {
            storage
                .append_status_history(
                    &mut snap,
                    make_history("a-1", seq, AnalysisStatus::Draft, AnalysisStatus::Submitted),
                )
                .await
                .map_err(|e| format!("append {seq}: {e}"))?;
        }
        storage
            .commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
    }

    let log = storage
        .list_status_history("a-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let sequences: Vec<u64> = log.iter().map(|e| e.sequence).collect();
    if sequences != vec![1, 2, 3, 4] {
        return Err(format!("expected [1, 2, 3, 4], got {sequences:?}"));
    }
    Ok(())
}

async fn history_sequence_never_reused<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    let entry = make_history("a-1", 1, AnalysisStatus::Draft, AnalysisStatus::Submitted);

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .append_status_history(&mut snap, entry.clone())
        .await
        .map_err(|e| format!("append: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut replacement = entry;
    replacement.to_status = AnalysisStatus::Approved;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let outcome = match storage.append_status_history(&mut snap, replacement).await {
        Ok(()) => storage.commit_snapshot(snap).await,
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    };
    if !matches!(outcome, Err(StorageError::AlreadyExists { .. })) {
        return Err(format!("expected AlreadyExists, got {outcome:?}"));
    }

    let log = storage
        .list_status_history("a-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    match log.as_slice() {
        [only] if only.to_status == AnalysisStatus::Submitted => Ok(()),
        _ => Err("history entry was overwritten".into()),
    }
}

async fn revision_sequence_never_reused<S, F, Fut>(factory: &F) -> Result<(), String>
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
    storage
        .append_revision(&mut snap, make_revision("a-1", 1))
        .await
        .map_err(|e| format!("append: {e}"))?;
    let duplicate = storage
        .append_revision(&mut snap, make_revision("a-1", 1))
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match duplicate {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        other => Err(format!("expected AlreadyExists, got {other:?}")),
    }
}

async fn append_for_missing_analysis_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let history = storage
        .append_status_history(
            &mut snap,
            make_history("ghost", 1, AnalysisStatus::Draft, AnalysisStatus::Submitted),
        )
        .await;
    let revision = storage
        .append_revision(&mut snap, make_revision("ghost", 1))
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match (history, revision) {
        (Err(StorageError::NotFound { .. }), Err(StorageError::NotFound { .. })) => Ok(()),
        (h, r) => Err(format!("expected NotFound twice, got {h:?} and {r:?}")),
    }
}

async fn logs_are_per_analysis<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    seed_analysis(&storage, "a-2").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for id in ["a-1", "a-2"] {
        storage
            .append_revision(&mut snap, make_revision(id, 1))
            .await
            .map_err(|e| format!("revision {id}: {e}"))?;
    }
    storage
        .append_revision(&mut snap, make_revision("a-1", 2))
        .await
        .map_err(|e| format!("revision a-1#2: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let a1 = storage
        .list_revisions("a-1")
        .await
        .map_err(|e| format!("list a-1: {e}"))?;
    let a2 = storage
        .list_revisions("a-2")
        .await
        .map_err(|e| format!("list a-2: {e}"))?;
    if a1.len() != 2 || a2.len() != 1 {
        return Err(format!(
            "expected 2 and 1 revisions, got {} and {}",
            a1.len(),
            a2.len()
        ));
    }
    if a2.iter().any(|r| r.analysis_id != "a-2") {
        return Err("revision listed under the wrong analysis".into());
    }
    Ok(())
}
