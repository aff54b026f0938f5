//! Review checkpoints: where a run pauses for a human decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::{PipelineVariant, StageKind};

/// A reviewer's verdict on a suspended run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { feedback: String },
    /// Auto mode, disabled review, or an elapsed checkpoint timeout.
    AutoApprove,
}

impl ReviewDecision {
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self::Reject {
            feedback: feedback.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::AutoApprove => "auto_approve",
        }
    }

    pub fn advances(&self) -> bool {
        matches!(self, Self::Approve | Self::AutoApprove)
    }
}

/// Whether runs pause at checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Interactive,
    /// Never pause; every checkpoint resolves as `AutoApprove`.
    Auto,
}

/// Which stages are followed by a review, and for how long one may wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// `(stage, checkpoint name)` pairs
    pub checkpoints: Vec<(StageKind, String)>,
    /// Pending reviews older than this auto-approve on the next resume
    pub timeout_secs: Option<u64>,
}

impl CheckpointPolicy {
    /// No checkpoints at all.
    pub fn none() -> Self {
        Self {
            checkpoints: Vec::new(),
            timeout_secs: None,
        }
    }

    /// House checkpoints for a pipeline variant.
    pub fn standard(variant: PipelineVariant, timeout_secs: Option<u64>) -> Self {
        let checkpoints = match variant {
            PipelineVariant::Product => vec![
                (StageKind::Research, "post_research"),
                (StageKind::MathModel, "post_design_math"),
                (StageKind::Art, "post_art_review"),
            ],
            PipelineVariant::LegalRecon => vec![
                (StageKind::LegalResearch, "post_legal_research"),
                (StageKind::DefinitionAnalysis, "post_definition_analysis"),
                (StageKind::GameArchitecture, "post_game_architecture"),
            ],
        };
        Self {
            checkpoints: checkpoints
                .into_iter()
                .map(|(k, n)| (k, n.to_string()))
                .collect(),
            timeout_secs,
        }
    }

    /// Name of the checkpoint following `stage`, if any.
    pub fn checkpoint_after(&self, stage: StageKind) -> Option<&str> {
        self.checkpoints
            .iter()
            .find(|(k, _)| *k == stage)
            .map(|(_, n)| n.as_str())
    }

    /// Whether a run in `mode` suspends after `stage`.
    pub fn should_pause(&self, stage: StageKind, mode: PipelineMode) -> bool {
        mode == PipelineMode::Interactive && self.checkpoint_after(stage).is_some()
    }
}

/// Lifecycle of one checkpoint instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Resolved {
        decision: ReviewDecision,
        resolved_at: DateTime<Utc>,
    },
}

/// One suspension after one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub name: String,
    pub stage: StageKind,
    /// Sequence index of the artifact under review
    pub artifact_seq: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CheckpointStatus,
}

impl Checkpoint {
    pub fn new(
        name: impl Into<String>,
        stage: StageKind,
        artifact_seq: u64,
        timeout_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            name: name.into(),
            stage,
            artifact_seq,
            created_at: now,
            expires_at: timeout_secs.map(|s| now + chrono::Duration::seconds(s as i64)),
            status: CheckpointStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Consume `decision`. Returns `false` (and changes nothing) when the
    /// checkpoint was already resolved.
    pub fn resolve(&mut self, decision: ReviewDecision, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = CheckpointStatus::Resolved {
            decision,
            resolved_at: now,
        };
        true
    }

    /// Decisions a caller may submit while this checkpoint is pending.
    pub fn valid_decisions(&self) -> &'static [&'static str] {
        if self.is_pending() {
            &["approve", "reject"]
        } else {
            &[]
        }
    }
}
