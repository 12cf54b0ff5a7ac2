use std::future::Future;
use std::sync::Arc;

use postmortem_core::AnalysisStatus;

use super::{seed_analysis, TestResult};
use crate::{AnalysisStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "racing_updates_exactly_one_wins",
            racing_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "updates_on_different_analyses_all_succeed",
            updates_on_different_analyses_all_succeed(factory).await,
        ),
    ]
}

/// Stage an update from version 0 and commit it. `Ok(false)` means the
/// snapshot lost an OCC race, either at the CAS call or at commit.
async fn try_update<S: AnalysisStorage>(
    storage: &S,
    id: &str,
    status: AnalysisStatus,
) -> Result<bool, StorageError> {
    let mut snap = storage.begin_snapshot().await?;
    let mut record = match storage.get_analysis_for_update(&mut snap, id).await {
        Ok(record) => record,
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            return Err(e);
        }
    };
    record.status = status;
    match storage.update_analysis(&mut snap, record, 0).await {
        Ok(_) => match storage.commit_snapshot(snap).await {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        },
        Err(StorageError::Conflict { .. }) => {
            storage.abort_snapshot(snap).await?;
            Ok(false)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

/// N tasks race to move the same analysis off version 0. Exactly one commit
/// lands; every other task sees `Conflict`.
async fn racing_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_analysis(storage.as_ref(), "a-1").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let status = if i % 2 == 0 {
            AnalysisStatus::Submitted
        } else {
            AnalysisStatus::Rejected
        };
        handles.push(tokio::spawn(async move {
            try_update(s.as_ref(), "a-1", status).await
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.version != 1 {
        return Err(format!("expected final version 1, got {}", rec.version));
    }
    Ok(())
}

async fn updates_on_different_analyses_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_analysis(storage.as_ref(), &format!("a-{i}")).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            try_update(s.as_ref(), &format!("a-{i}"), AnalysisStatus::Submitted).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error on a-{i}: {e}"))?;
        if !won {
            return Err(format!("a-{i} lost a race it had no competitor in"));
        }
    }
    Ok(())
}
