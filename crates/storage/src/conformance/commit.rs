use std::future::Future;

use postmortem_core::AnalysisStatus;

use super::{commit_status, make_history, make_report, make_revision, seed_analysis, TestResult};
use crate::{AnalysisStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "commit",
            "row_and_logs_visible_together",
            row_and_logs_visible_together(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "conflicting_commit_applies_nothing",
            conflicting_commit_applies_nothing(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "report_requires_existing_analysis",
            report_requires_existing_analysis(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "reports_listed_per_analysis",
            reports_listed_per_analysis(factory).await,
        ),
    ]
}

async fn row_and_logs_visible_together<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let new_version = storage
        .update_analysis(&mut snap, record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    storage
        .append_revision(&mut snap, make_revision("a-1", 1))
        .await
        .map_err(|e| format!("revision: {e}"))?;
    storage
        .append_status_history(
            &mut snap,
            make_history("a-1", 1, AnalysisStatus::Draft, AnalysisStatus::Submitted),
        )
        .await
        .map_err(|e| format!("history: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }
    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.status != AnalysisStatus::Submitted || rec.version != 1 {
        return Err(format!(
            "row not committed: status {} version {}",
            rec.status, rec.version
        ));
    }
    let history = storage
        .list_status_history("a-1")
        .await
        .map_err(|e| format!("history: {e}"))?;
    let revisions = storage
        .list_revisions("a-1")
        .await
        .map_err(|e| format!("revisions: {e}"))?;
    if history.len() != 1 || revisions.len() != 1 {
        return Err(format!(
            "expected 1 history + 1 revision, got {} + {}",
            history.len(),
            revisions.len()
        ));
    }
    Ok(())
}

/// A snapshot whose CAS base is overtaken before it commits must leave no
/// trace: neither its row update nor its log entries.
async fn conflicting_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;

    let mut slow = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin slow: {e}"))?;
    let mut record = storage
        .get_analysis_for_update(&mut slow, "a-1")
        .await
        .map_err(|e| format!("get_for_update: {e}"))?;
    record.status = AnalysisStatus::Submitted;
    let staged = storage.update_analysis(&mut slow, record, 0).await;
    let appended = storage
        .append_status_history(
            &mut slow,
            make_history("a-1", 1, AnalysisStatus::Draft, AnalysisStatus::Submitted),
        )
        .await;

    // A faster writer wins the row in between.
    commit_status(&storage, "a-1", 0, AnalysisStatus::Rejected).await?;

    let outcome = match (staged, appended) {
        (Ok(_), Ok(())) => storage.commit_snapshot(slow).await,
        (Err(e), _) | (_, Err(e)) => {
            let _ = storage.abort_snapshot(slow).await;
            Err(e)
        }
    };
    match outcome {
        Err(StorageError::Conflict { .. }) => {}
        other => return Err(format!("expected Conflict, got {other:?}")),
    }

    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.status != AnalysisStatus::Rejected || rec.version != 1 {
        return Err(format!(
            "loser leaked into row: status {} version {}",
            rec.status, rec.version
        ));
    }
    let history = storage
        .list_status_history("a-1")
        .await
        .map_err(|e| format!("history: {e}"))?;
    if !history.is_empty() {
        return Err(format!("loser leaked {} history entries", history.len()));
    }
    Ok(())
}

async fn report_requires_existing_analysis<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let result = storage
        .insert_report(&mut snap, make_report("rep-1", "ghost"))
        .await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn reports_listed_per_analysis<S, F, Fut>(factory: &F) -> Result<(), String>
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
    for (id, analysis) in [("rep-1", "a-1"), ("rep-2", "a-1"), ("rep-3", "a-2")] {
        storage
            .insert_report(&mut snap, make_report(id, analysis))
            .await
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let for_a1 = storage
        .list_reports(Some("a-1"))
        .await
        .map_err(|e| format!("list a-1: {e}"))?;
    let all = storage
        .list_reports(None)
        .await
        .map_err(|e| format!("list all: {e}"))?;
    if for_a1.len() != 2 || all.len() != 3 {
        return Err(format!(
            "expected 2 and 3 reports, got {} and {}",
            for_a1.len(),
            all.len()
        ));
    }
    Ok(())
}
