//! Error types for stages and the run state machine.

use forge_core::{ProviderError, TargetError};
use forge_state::StorageError;

use crate::stage::StageKind;

/// Why a single stage invocation did not produce an output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// Timeouts, rate limits, provider unavailability. Retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed input contract or output failing validation. Fails the run.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("stage {stage} requires a {input} artifact")]
    MissingInput { stage: StageKind, input: StageKind },

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}

impl StageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ProviderError> for StageError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(msg) => Self::Transient(msg),
            ProviderError::Invalid(msg) => Self::Validation(msg),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("malformed artifact payload: {e}"))
    }
}

/// Errors surfaced to callers of [`crate::Pipeline`].
///
/// Stage failures are not errors at this level: they move the run to
/// `Failed` and are reported through the run report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("run {0} is already being driven by another caller")]
    Busy(String),

    #[error("run {run_id} is {status}, not awaiting review")]
    NotSuspended { run_id: String, status: String },

    #[error("run {run_id} has no checkpoint {checkpoint_id}")]
    UnknownCheckpoint {
        run_id: String,
        checkpoint_id: String,
    },

    #[error("no stage registered for {0}")]
    UnknownStage(StageKind),

    #[error("invalid target: {0}")]
    Target(#[from] TargetError),

    #[error("corrupt run snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::RunNotFound { run_id } => Self::RunNotFound(run_id),
            other => Self::Storage(other),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
