//! Snapshot plumbing shared by every mutating operation.

use postmortem_core::{EngineError, ErrorKind};
use postmortem_storage::{AnalysisStorage, StorageError};

pub(crate) fn storage_err(e: StorageError) -> EngineError {
    match e {
        StorageError::Conflict {
            entity,
            id,
            expected_version,
            actual_version,
        } => EngineError::Conflict {
            entity,
            id,
            expected_version,
            actual_version,
        },
        StorageError::AlreadyExists { entity, id } => EngineError::Conflict {
            entity,
            id,
            expected_version: 0,
            actual_version: None,
        },
        StorageError::NotFound { entity, id } => EngineError::NotFound { kind: entity, id },
        StorageError::Backend(message) => EngineError::Infrastructure { message },
    }
}

/// Reject a caller whose version token no longer matches the stored row.
pub(crate) fn check_version(
    entity: &'static str,
    id: &str,
    expected: i64,
    actual: i64,
) -> Result<(), EngineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EngineError::Conflict {
            entity,
            id: id.to_string(),
            expected_version: expected,
            actual_version: Some(actual),
        })
    }
}

/// Commit `snapshot` if `result` is `Ok`, abort it otherwise.
///
/// A commit failure (typically an OCC conflict detected at commit) replaces
/// the successful result.
pub(crate) async fn finish<S, T>(
    storage: &S,
    snapshot: S::Snapshot,
    operation: &'static str,
    result: Result<T, EngineError>,
) -> Result<T, EngineError>
where
    S: AnalysisStorage,
{
    let outcome = match result {
        Ok(value) => storage
            .commit_snapshot(snapshot)
            .await
            .map(|()| value)
            .map_err(storage_err),
        Err(e) => {
            if let Err(abort) = storage.abort_snapshot(snapshot).await {
                tracing::warn!(operation, error = %abort, "snapshot abort failed");
            }
            Err(e)
        }
    };
    if let Err(e) = &outcome {
        log_failure(operation, e);
    }
    outcome
}

pub(crate) fn log_failure(operation: &'static str, err: &EngineError) {
    match err.kind() {
        ErrorKind::Conflict => tracing::warn!(operation, error = %err, "optimistic concurrency conflict"),
        ErrorKind::Infrastructure => tracing::error!(operation, error = %err, "storage failure"),
        ErrorKind::Forbidden => tracing::debug!(operation, error = %err, "authorization denied"),
        _ => tracing::debug!(operation, error = %err, "operation rejected"),
    }
}
