use std::future::Future;

use postmortem_core::AnalysisStatus;

use super::{make_analysis, make_task, seed_analysis, TestResult};
use crate::{AnalysisFilter, AnalysisStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "insert_analysis_visible_after_commit",
            insert_analysis_visible_after_commit(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_analysis_already_exists",
            duplicate_analysis_already_exists(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_in_same_snapshot_already_exists",
            duplicate_in_same_snapshot_already_exists(factory).await,
        ),
        TestResult::from_result(
            "init",
            "missing_analysis_not_found",
            missing_analysis_not_found(factory).await,
        ),
        TestResult::from_result(
            "init",
            "task_insert_and_list",
            task_insert_and_list(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_task_already_exists",
            duplicate_task_already_exists(factory).await,
        ),
        TestResult::from_result(
            "init",
            "list_analyses_applies_filter",
            list_analyses_applies_filter(factory).await,
        ),
    ]
}

async fn insert_analysis_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed_analysis(&storage, "a-1").await?;
    let rec = storage
        .get_analysis("a-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    if rec.status != AnalysisStatus::Draft {
        return Err(format!("expected DRAFT, got {}", rec.status));
    }
    if rec != make_analysis("a-1") {
        return Err("stored record differs from inserted record".into());
    }
    Ok(())
}

async fn duplicate_analysis_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
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
    match storage.insert_analysis(&mut snap, make_analysis("a-1")).await {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => match storage.commit_snapshot(snap).await {
            Err(StorageError::AlreadyExists { .. }) => Ok(()),
            other => Err(format!("duplicate insert committed: {other:?}")),
        },
    }
}

async fn duplicate_in_same_snapshot_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
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
        .map_err(|e| format!("first insert: {e}"))?;
    let second = storage.insert_analysis(&mut snap, make_analysis("a-1")).await;
    let _ = storage.abort_snapshot(snap).await;
    match second {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        other => Err(format!("expected AlreadyExists, got {other:?}")),
    }
}

async fn missing_analysis_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: AnalysisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_analysis("nope").await {
        Err(StorageError::NotFound { .. }) => {}
        other => return Err(format!("get: expected NotFound, got {other:?}")),
    }
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let result = storage.get_analysis_for_update(&mut snap, "nope").await;
    let _ = storage.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("get_for_update: expected NotFound, got {other:?}")),
    }
}

async fn task_insert_and_list<S, F, Fut>(factory: &F) -> Result<(), String>
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
    for id in ["task-1", "task-2"] {
        storage
            .insert_task(&mut snap, make_task(id))
            .await
            .map_err(|e| format!("insert {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let tasks = storage
        .list_tasks()
        .await
        .map_err(|e| format!("list: {e}"))?;
    if tasks.len() != 2 {
        return Err(format!("expected 2 tasks, got {}", tasks.len()));
    }
    let task = storage
        .get_task("task-2")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if task != make_task("task-2") {
        return Err("stored task differs from inserted task".into());
    }
    match storage.get_task("task-3").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn duplicate_task_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
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
    match storage.insert_task(&mut snap, make_task("task-1")).await {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => match storage.commit_snapshot(snap).await {
            Err(StorageError::AlreadyExists { .. }) => Ok(()),
            other => Err(format!("duplicate task committed: {other:?}")),
        },
    }
}

async fn list_analyses_applies_filter<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let mut other_owner = make_analysis("a-2");
    other_owner.owner_id = "employee-2".into();
    let mut submitted = make_analysis("a-3");
    submitted.status = AnalysisStatus::Submitted;
    for record in [make_analysis("a-1"), other_owner, submitted] {
        storage
            .insert_analysis(&mut snap, record)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let all = storage
        .list_analyses(&AnalysisFilter::default())
        .await
        .map_err(|e| format!("list all: {e}"))?;
    if all.len() != 3 {
        return Err(format!("expected 3 analyses, got {}", all.len()));
    }
    let mine = storage
        .list_analyses(&AnalysisFilter {
            owner_id: Some("employee-1".into()),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("list by owner: {e}"))?;
    if mine.len() != 2 {
        return Err(format!("expected 2 owned analyses, got {}", mine.len()));
    }
    let drafts = storage
        .list_analyses(&AnalysisFilter {
            owner_id: Some("employee-1".into()),
            status: Some(AnalysisStatus::Draft),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("list by status: {e}"))?;
    match drafts.as_slice() {
        [only] if only.id == "a-1" => Ok(()),
        other => Err(format!("expected only a-1, got {} records", other.len())),
    }
}
