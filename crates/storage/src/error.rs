/// All errors that can be returned by an `AnalysisStorage` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: the row changed after it was
    /// read. `actual_version` is the version found, when the backend knows it.
    #[error("concurrent conflict on {entity} {id}: expected version {expected_version}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected_version: i64,
        actual_version: Option<i64>,
    },

    /// No row with the given key.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A row (or log sequence number) with this key already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// A backend-specific failure (connection loss, serialization, poisoned state).
    #[error("storage backend error: {0}")]
    Backend(String),
}
