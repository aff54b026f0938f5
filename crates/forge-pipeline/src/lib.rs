//! Forge-Pipeline: staged run orchestration for SlotForge
//!
//! Drives a run through an ordered plan of stages:
//! - Each stage reads the latest artifacts of its declared inputs and
//!   appends exactly one artifact per successful invocation
//! - Transient failures retry with exponential backoff under a per-stage
//!   timeout; anything else fails the run with a typed reason
//! - Review checkpoints suspend interactive runs until a decision arrives;
//!   rejection feedback re-runs the reviewed stage
//! - Every transition is persisted, so runs resume after a restart

pub mod checkpoint;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod run;
pub mod runner;
pub mod stage;
pub mod stages;

pub use checkpoint::{Checkpoint, CheckpointPolicy, CheckpointStatus, PipelineMode, ReviewDecision};
pub use error::{PipelineError, PipelineResult, StageError};
pub use pipeline::Pipeline;
pub use report::{ArtifactSummary, PendingReview, RunReport, RunSummary};
pub use run::{FailureReason, RunSnapshot, RunStatus, Transition, TransitionKind};
pub use runner::{execute_stage, RetryPolicy, StageRun};
pub use stage::{
    PipelineVariant, ReconRequest, RunRequest, Stage, StageInput, StageKind, StageOutput,
};
pub use stages::{standard_stages, Providers};
