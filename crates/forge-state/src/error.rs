//! Error types for forge-state

use thiserror::Error;

/// Errors raised by artifact, run and knowledge stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No artifact recorded for the requested stage.
    #[error("no artifact for stage '{stage}' in run {run_id}")]
    NotFound { run_id: String, stage: String },

    /// Run snapshot does not exist.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Knowledge key does not exist.
    #[error("knowledge entry not found: {key}")]
    KeyNotFound { key: String },

    /// Digest string is not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Stored artifact no longer matches its recorded digest.
    #[error("artifact {run_id}#{seq} failed digest check")]
    Corrupted { run_id: String, seq: u64 },

    /// A write would have overwritten an existing record.
    #[error("artifact {run_id}#{seq} already exists")]
    Conflict { run_id: String, seq: u64 },

    /// Vector dimension differs from the store's dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Payload (de)serialization failure.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Database or driver failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl StorageError {
    /// Whether this error is the expected "nothing recorded yet" case.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. }
                | StorageError::RunNotFound { .. }
                | StorageError::KeyNotFound { .. }
        )
    }
}
