//! Run inspection: reports and listings.

use std::fmt;

use chrono::{DateTime, Utc};
use forge_state::{Artifact, RunRecord};
use serde::Serialize;

use crate::checkpoint::PipelineMode;
use crate::run::{FailureReason, RunSnapshot, RunStatus, Transition};
use crate::stage::{PipelineVariant, StageKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSummary {
    pub stage: String,
    pub seq: u64,
    pub digest: String,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(a: &Artifact) -> Self {
        Self {
            stage: a.stage.clone(),
            seq: a.seq,
            digest: a.digest.as_str().to_string(),
            degraded: a.degraded,
            created_at: a.created_at,
        }
    }
}

/// The review a suspended run is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReview {
    pub checkpoint_id: String,
    pub name: String,
    pub stage: StageKind,
    pub artifact_seq: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub valid_decisions: Vec<String>,
}

/// Everything a caller needs to know about one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub variant: PipelineVariant,
    pub label: String,
    pub mode: PipelineMode,
    pub status: RunStatus,
    pub plan: Vec<StageKind>,
    pub current_stage: Option<StageKind>,
    pub artifacts: Vec<ArtifactSummary>,
    pub pending: Option<PendingReview>,
    pub failure: Option<FailureReason>,
    pub warnings: Vec<String>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunReport {
    pub fn build(snapshot: &RunSnapshot, artifacts: &[Artifact]) -> Self {
        let pending = snapshot.pending_checkpoint().map(|cp| PendingReview {
            checkpoint_id: cp.checkpoint_id.clone(),
            name: cp.name.clone(),
            stage: cp.stage,
            artifact_seq: cp.artifact_seq,
            expires_at: cp.expires_at,
            valid_decisions: cp.valid_decisions().iter().map(|d| d.to_string()).collect(),
        });
        Self {
            run_id: snapshot.run_id.to_string(),
            variant: snapshot.variant(),
            label: snapshot.request.label().to_string(),
            mode: snapshot.mode,
            status: snapshot.status.clone(),
            plan: snapshot.plan.clone(),
            current_stage: if snapshot.status.is_terminal() {
                None
            } else {
                snapshot.current_stage()
            },
            artifacts: artifacts.iter().map(ArtifactSummary::from).collect(),
            pending,
            failure: snapshot.failure().cloned(),
            warnings: snapshot.warnings.clone(),
            transitions: snapshot.transitions.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }

    /// Artifacts written by `stage`, oldest first.
    pub fn artifacts_for(&self, stage: StageKind) -> Vec<&ArtifactSummary> {
        self.artifacts
            .iter()
            .filter(|a| a.stage == stage.name())
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} ({}: {})", self.run_id, self.variant, self.label)?;
        writeln!(f, "  status: {}", self.status)?;
        if let Some(stage) = self.current_stage {
            let pos = self.plan.iter().position(|k| *k == stage).map_or(0, |p| p + 1);
            writeln!(f, "  stage:  {stage} [{pos}/{}]", self.plan.len())?;
        }
        if !self.artifacts.is_empty() {
            writeln!(f, "  artifacts:")?;
            for a in &self.artifacts {
                let short = a.digest.get(..12).unwrap_or(&a.digest);
                let flag = if a.degraded { " (degraded)" } else { "" };
                writeln!(f, "    #{:<3} {:<20} {short}{flag}", a.seq, a.stage)?;
            }
        }
        if let Some(p) = &self.pending {
            writeln!(f, "  awaiting review: {} after {} ({})", p.name, p.stage, p.checkpoint_id)?;
            if let Some(exp) = p.expires_at {
                writeln!(f, "    auto-approves after {}", exp.to_rfc3339())?;
            }
            writeln!(f, "    decisions: {}", p.valid_decisions.join(", "))?;
        }
        if let Some(reason) = &self.failure {
            writeln!(f, "  failure: {reason}")?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "  warnings:")?;
            for w in &self.warnings {
                writeln!(f, "    - {w}")?;
            }
        }
        Ok(())
    }
}

/// One line of `list` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub variant: Option<PipelineVariant>,
    pub label: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RunRecord> for RunSummary {
    fn from(record: RunRecord) -> Self {
        let (run_id, status, created_at, updated_at) = (
            record.run_id.to_string(),
            record.status.clone(),
            record.created_at,
            record.updated_at,
        );
        // unreadable snapshots still list, without details
        let snapshot = RunSnapshot::from_record(record).ok();
        Self {
            run_id,
            variant: snapshot.as_ref().map(RunSnapshot::variant),
            label: snapshot.as_ref().map(|s| s.request.label().to_string()),
            status,
            created_at,
            updated_at,
        }
    }
}
