//! Persisted run state.
//!
//! A [`RunSnapshot`] is the complete state of one run. It is written to the
//! run repository after every transition, so a process restart can resume
//! exactly where the previous one stopped.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use forge_state::{RunId, RunRecord};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, PipelineMode};
use crate::error::{PipelineError, PipelineResult};
use crate::stage::{PipelineVariant, RunRequest, StageKind};

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    MissingInput { stage: StageKind, input: StageKind },
    Validation { stage: StageKind, message: String },
    RetriesExhausted { stage: StageKind, attempts: u32, message: String },
    RejectionLimit { stage: StageKind, rejections: u32 },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingInput { stage, input } => {
                write!(f, "missing input: {stage} requires {input}")
            }
            FailureReason::Validation { stage, message } => {
                write!(f, "{stage} failed validation: {message}")
            }
            FailureReason::RetriesExhausted {
                stage,
                attempts,
                message,
            } => write!(f, "{stage} failed after {attempts} attempt(s): {message}"),
            FailureReason::RejectionLimit { stage, rejections } => {
                write!(f, "{stage} rejected {rejections} time(s)")
            }
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Initialized,
    Running { stage_index: usize },
    Suspended { checkpoint_id: String },
    Completed,
    Failed { reason: FailureReason },
}

impl RunStatus {
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Initialized => "initialized",
            RunStatus::Running { .. } => "running",
            RunStatus::Suspended { .. } => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed { .. })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry in a run's ordered transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransitionKind {
    Started,
    StageStarted { attempt: u32 },
    StageRetried { attempt: u32, error: String },
    StageCompleted { seq: u64, degraded: bool },
    StageFailed { error: String },
    Suspended { checkpoint: String },
    Approved { checkpoint: String },
    AutoApproved { checkpoint: String },
    Rejected { checkpoint: String, feedback: String },
    Completed,
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub stage: Option<StageKind>,
    #[serde(flatten)]
    pub kind: TransitionKind,
}

/// Complete persisted state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub request: RunRequest,
    pub mode: PipelineMode,
    /// Ordered stages this run executes
    pub plan: Vec<StageKind>,
    pub status: RunStatus,
    /// Index into `plan` of the next stage to run (or the stage under review)
    pub stage_index: usize,
    /// Reviewer feedback per stage, oldest first
    #[serde(default)]
    pub feedback: BTreeMap<StageKind, Vec<String>>,
    #[serde(default)]
    pub rejections: BTreeMap<StageKind, u32>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn new(request: RunRequest, mode: PipelineMode, plan: Vec<StageKind>) -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            request,
            mode,
            plan,
            status: RunStatus::Initialized,
            stage_index: 0,
            feedback: BTreeMap::new(),
            rejections: BTreeMap::new(),
            checkpoints: Vec::new(),
            transitions: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn variant(&self) -> PipelineVariant {
        self.request.variant()
    }

    pub fn current_stage(&self) -> Option<StageKind> {
        self.plan.get(self.stage_index).copied()
    }

    pub fn record(&mut self, stage: Option<StageKind>, kind: TransitionKind) {
        let now = Utc::now();
        self.transitions.push(Transition { at: now, stage, kind });
        self.updated_at = now;
    }

    pub fn pending_checkpoint(&self) -> Option<&Checkpoint> {
        match &self.status {
            RunStatus::Suspended { checkpoint_id } => self
                .checkpoints
                .iter()
                .find(|c| &c.checkpoint_id == checkpoint_id),
            _ => None,
        }
    }

    pub fn pending_checkpoint_mut(&mut self) -> Option<&mut Checkpoint> {
        match &self.status {
            RunStatus::Suspended { checkpoint_id } => {
                let id = checkpoint_id.clone();
                self.checkpoints.iter_mut().find(|c| c.checkpoint_id == id)
            }
            _ => None,
        }
    }

    /// All feedback for `stage` joined for the stage prompt.
    pub fn feedback_for(&self, stage: StageKind) -> Option<String> {
        self.feedback
            .get(&stage)
            .filter(|f| !f.is_empty())
            .map(|f| f.join("\n"))
    }

    pub fn fail(&mut self, reason: FailureReason) {
        let stage = self.current_stage();
        self.record(stage, TransitionKind::Failed { reason: reason.clone() });
        self.status = RunStatus::Failed { reason };
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            RunStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn to_record(&self) -> PipelineResult<RunRecord> {
        let snapshot =
            serde_json::to_value(self).map_err(|e| PipelineError::Snapshot(e.to_string()))?;
        Ok(RunRecord {
            run_id: self.run_id.clone(),
            status: self.status.name().to_string(),
            snapshot,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_record(record: RunRecord) -> PipelineResult<Self> {
        serde_json::from_value(record.snapshot).map_err(|e| PipelineError::Snapshot(e.to_string()))
    }
}
