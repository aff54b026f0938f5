//! The run state machine.
//!
//! A [`Pipeline`] owns the stage registry and the stores. Runs move
//! `Initialized -> Running -> {Suspended | Completed | Failed}`; every
//! transition is persisted before the next one starts, so any process can
//! pick a run up again with [`Pipeline::resume`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use forge_core::{obs, PipelineConfig, TargetRequest, METRICS};
use forge_state::{Artifact, ArtifactStore, NewArtifact, RunId, RunRepository};
use tracing::{info, Instrument};

use crate::checkpoint::{Checkpoint, CheckpointPolicy, PipelineMode, ReviewDecision};
use crate::error::{PipelineError, PipelineResult, StageError};
use crate::report::{RunReport, RunSummary};
use crate::run::{FailureReason, RunSnapshot, RunStatus, TransitionKind};
use crate::runner::{execute_stage, RetryPolicy};
use crate::stage::{ReconRequest, RunRequest, Stage, StageInput, StageKind};

/// Removes the run from the active set when a drive ends, together with
/// any cancel request the drive did not get to.
struct DriveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    cancel_requests: &'a Mutex<HashSet<String>>,
    run_id: String,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.cancel_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
    }
}

/// Staged run orchestrator.
pub struct Pipeline {
    stages: HashMap<StageKind, Arc<dyn Stage>>,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<dyn RunRepository>,
    config: PipelineConfig,
    active: Mutex<HashSet<String>>,
    cancel_requests: Mutex<HashSet<String>>,
}

impl Pipeline {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        runs: Arc<dyn RunRepository>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stages: HashMap::new(),
            artifacts,
            runs,
            config,
            active: Mutex::new(HashSet::new()),
            cancel_requests: Mutex::new(HashSet::new()),
        }
    }

    /// Register stages; a later stage replaces an earlier one of the same kind.
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
        for stage in stages {
            self.register(stage);
        }
        self
    }

    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.kind(), stage);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Starting runs
    // ------------------------------------------------------------------

    /// Validate `target` and drive a new product run until it suspends or ends.
    pub async fn start_product(
        &self,
        target: &TargetRequest,
        mode: PipelineMode,
    ) -> PipelineResult<RunReport> {
        let (spec, warnings) = target.validate(self.config.strict_features)?;
        let request = RunRequest::Product(spec);
        let plan = request.variant().stages().to_vec();
        let run_id = self.create_run(request, mode, plan, warnings).await?;
        self.drive(&run_id).await
    }

    /// Drive a new legal-recon run until it suspends or ends.
    pub async fn start_recon(
        &self,
        request: ReconRequest,
        mode: PipelineMode,
    ) -> PipelineResult<RunReport> {
        let request = RunRequest::LegalRecon(request);
        let plan = request.variant().stages().to_vec();
        let run_id = self.create_run(request, mode, plan, Vec::new()).await?;
        self.drive(&run_id).await
    }

    /// Persist a new run with an explicit stage plan without driving it.
    pub async fn create_with_plan(
        &self,
        request: RunRequest,
        mode: PipelineMode,
        plan: Vec<StageKind>,
    ) -> PipelineResult<RunId> {
        self.create_run(request, mode, plan, Vec::new()).await
    }

    async fn create_run(
        &self,
        request: RunRequest,
        mode: PipelineMode,
        plan: Vec<StageKind>,
        warnings: Vec<String>,
    ) -> PipelineResult<RunId> {
        if let Some(kind) = plan.iter().find(|k| !self.stages.contains_key(k)) {
            return Err(PipelineError::UnknownStage(*kind));
        }
        let mode = if self.config.hitl_enabled {
            mode
        } else {
            PipelineMode::Auto
        };
        let mut snap = RunSnapshot::new(request, mode, plan);
        snap.warnings = warnings;
        snap.record(None, TransitionKind::Started);
        self.save(&snap).await?;
        obs::emit_run_started(
            snap.run_id.as_str(),
            snap.variant().name(),
            snap.request.label(),
        );
        Ok(snap.run_id)
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Advance a run until it suspends at a checkpoint or reaches a
    /// terminal state. Fails with [`PipelineError::Busy`] if another caller
    /// is already driving it.
    pub async fn drive(&self, run_id: &RunId) -> PipelineResult<RunReport> {
        let _guard = self.acquire(run_id)?;
        self.drive_locked(run_id)
            .instrument(obs::run_span(run_id.as_str()))
            .await
    }

    /// Continue a run after a restart or a review timeout.
    ///
    /// Runs left `Running` by a dead process continue from their recorded
    /// stage. Suspended runs whose checkpoint has expired auto-approve;
    /// other suspended runs are returned unchanged.
    pub async fn resume(&self, run_id: &RunId) -> PipelineResult<RunReport> {
        info!(run_id = %run_id, "resuming run");
        self.drive(run_id).await
    }

    async fn drive_locked(&self, run_id: &RunId) -> PipelineResult<RunReport> {
        let mut snap = self.load(run_id).await?;
        let policy = self.policy_for(&snap);

        let expired = snap
            .pending_checkpoint()
            .is_some_and(|cp| cp.is_expired_at(Utc::now()));
        if expired {
            info!(run_id = %run_id, "review timed out; auto-approving");
            self.apply_decision(&mut snap, ReviewDecision::AutoApprove)?;
            self.save(&snap).await?;
        }

        if snap.status.is_terminal() || matches!(snap.status, RunStatus::Suspended { .. }) {
            return self.report_for(&snap).await;
        }

        while snap.stage_index < snap.plan.len() {
            if self.take_cancel(run_id) {
                snap.fail(FailureReason::Cancelled);
                break;
            }

            let kind = snap.plan[snap.stage_index];
            let stage = self
                .stages
                .get(&kind)
                .cloned()
                .ok_or(PipelineError::UnknownStage(kind))?;
            snap.status = RunStatus::Running {
                stage_index: snap.stage_index,
            };

            let artifacts = match self.gather_inputs(run_id, stage.as_ref()).await? {
                Ok(artifacts) => artifacts,
                Err(missing) => {
                    let err = StageError::MissingInput {
                        stage: kind,
                        input: missing,
                    };
                    obs::emit_stage_failed(run_id.as_str(), kind.name(), &err);
                    snap.fail(FailureReason::MissingInput {
                        stage: kind,
                        input: missing,
                    });
                    break;
                }
            };

            let mut input = StageInput {
                run_id: run_id.clone(),
                request: snap.request.clone(),
                artifacts,
                feedback: snap.feedback_for(kind),
                attempt: 0,
            };
            snap.record(Some(kind), TransitionKind::StageStarted { attempt: 1 });
            self.save(&snap).await?;

            let retry = RetryPolicy::for_stage(&self.config, kind);
            let mut retries = Vec::new();
            let result = execute_stage(stage.as_ref(), &mut input, &retry, |attempt, err| {
                retries.push((attempt, err.to_string()))
            })
            .await;
            for (attempt, error) in retries {
                snap.record(Some(kind), TransitionKind::StageRetried { attempt, error });
            }

            let run = match result {
                Ok(run) => run,
                Err(err) => {
                    obs::emit_stage_failed(run_id.as_str(), kind.name(), &err);
                    snap.record(
                        Some(kind),
                        TransitionKind::StageFailed {
                            error: err.to_string(),
                        },
                    );
                    snap.fail(failure_reason(kind, err));
                    break;
                }
            };

            let artifact = self
                .artifacts
                .put(
                    run_id,
                    NewArtifact::new(kind.name(), run.output.payload).degraded(run.output.degraded),
                )
                .await?;
            snap.warnings
                .extend(run.output.warnings.into_iter().map(|w| format!("{kind}: {w}")));
            snap.record(
                Some(kind),
                TransitionKind::StageCompleted {
                    seq: artifact.seq,
                    degraded: artifact.degraded,
                },
            );
            obs::emit_stage_completed(
                run_id.as_str(),
                kind.name(),
                artifact.seq,
                artifact.degraded,
                run.duration_ms,
            );

            // a cancel that arrived mid-stage wins over the checkpoint
            if self.take_cancel(run_id) {
                snap.fail(FailureReason::Cancelled);
                break;
            }

            if let Some(name) = policy.checkpoint_after(kind) {
                let mut cp = Checkpoint::new(name, kind, artifact.seq, policy.timeout_secs, Utc::now());
                if policy.should_pause(kind, snap.mode) {
                    snap.record(
                        Some(kind),
                        TransitionKind::Suspended {
                            checkpoint: name.to_string(),
                        },
                    );
                    snap.status = RunStatus::Suspended {
                        checkpoint_id: cp.checkpoint_id.clone(),
                    };
                    snap.checkpoints.push(cp);
                    self.save(&snap).await?;
                    obs::emit_checkpoint_pending(run_id.as_str(), name, kind.name());
                    METRICS.flush();
                    return self.report_for(&snap).await;
                }
                cp.resolve(ReviewDecision::AutoApprove, Utc::now());
                snap.checkpoints.push(cp);
                snap.record(
                    Some(kind),
                    TransitionKind::AutoApproved {
                        checkpoint: name.to_string(),
                    },
                );
                obs::emit_checkpoint_resolved(run_id.as_str(), name, "auto_approve");
                METRICS.inc_checkpoints();
            }

            snap.stage_index += 1;
            self.save(&snap).await?;
        }

        if !snap.status.is_terminal() {
            snap.status = RunStatus::Completed;
            snap.record(None, TransitionKind::Completed);
        }
        self.save(&snap).await?;

        let report = self.report_for(&snap).await?;
        obs::emit_run_finished(run_id.as_str(), snap.status.name(), report.artifacts.len());
        METRICS.flush();
        Ok(report)
    }

    /// Latest artifact per declared input, or the first missing kind that
    /// the stage has no fallback for.
    async fn gather_inputs(
        &self,
        run_id: &RunId,
        stage: &dyn Stage,
    ) -> PipelineResult<Result<BTreeMap<StageKind, Artifact>, StageKind>> {
        let mut artifacts = BTreeMap::new();
        for kind in stage.inputs() {
            match self.artifacts.get_latest(run_id, kind.name()).await {
                Ok(artifact) => {
                    artifacts.insert(kind, artifact);
                }
                Err(e) if e.is_not_found() => {
                    if !stage.has_fallback(kind) {
                        return Ok(Err(kind));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Ok(artifacts))
    }

    // ------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------

    /// Apply a review decision to the pending checkpoint and keep driving.
    ///
    /// With `checkpoint_id` set, a decision for an already resolved
    /// checkpoint is ignored and the current report returned.
    pub async fn submit_decision(
        &self,
        run_id: &RunId,
        checkpoint_id: Option<&str>,
        decision: ReviewDecision,
    ) -> PipelineResult<RunReport> {
        let _guard = self.acquire(run_id)?;
        let mut snap = self.load(run_id).await?;

        if let Some(id) = checkpoint_id {
            let cp = snap
                .checkpoints
                .iter()
                .find(|c| c.checkpoint_id == id)
                .ok_or_else(|| PipelineError::UnknownCheckpoint {
                    run_id: run_id.to_string(),
                    checkpoint_id: id.to_string(),
                })?;
            if !cp.is_pending() {
                info!(run_id = %run_id, checkpoint = %id, "duplicate decision ignored");
                return self.report_for(&snap).await;
            }
        }

        self.apply_decision(&mut snap, decision)?;
        self.save(&snap).await?;
        if snap.status.is_terminal() {
            let report = self.report_for(&snap).await?;
            obs::emit_run_finished(run_id.as_str(), snap.status.name(), report.artifacts.len());
            return Ok(report);
        }
        self.drive_locked(run_id)
            .instrument(obs::run_span(run_id.as_str()))
            .await
    }

    fn apply_decision(
        &self,
        snap: &mut RunSnapshot,
        decision: ReviewDecision,
    ) -> PipelineResult<()> {
        let run_id = snap.run_id.to_string();
        let status = snap.status.name().to_string();
        let cp = snap
            .pending_checkpoint_mut()
            .ok_or(PipelineError::NotSuspended {
                run_id: run_id.clone(),
                status,
            })?;
        cp.resolve(decision.clone(), Utc::now());
        let (name, stage) = (cp.name.clone(), cp.stage);
        obs::emit_checkpoint_resolved(&run_id, &name, decision.name());
        METRICS.inc_checkpoints();

        match decision {
            ReviewDecision::Approve => {
                snap.record(Some(stage), TransitionKind::Approved { checkpoint: name });
                snap.stage_index += 1;
            }
            ReviewDecision::AutoApprove => {
                snap.record(Some(stage), TransitionKind::AutoApproved { checkpoint: name });
                snap.stage_index += 1;
            }
            ReviewDecision::Reject { feedback } => {
                snap.record(
                    Some(stage),
                    TransitionKind::Rejected {
                        checkpoint: name,
                        feedback: feedback.clone(),
                    },
                );
                let count = snap.rejections.entry(stage).or_insert(0);
                *count += 1;
                let count = *count;
                if count > self.config.max_rejections {
                    snap.fail(FailureReason::RejectionLimit {
                        stage,
                        rejections: count,
                    });
                    return Ok(());
                }
                snap.feedback.entry(stage).or_default().push(feedback);
            }
        }
        snap.status = RunStatus::Running {
            stage_index: snap.stage_index,
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cancellation and inspection
    // ------------------------------------------------------------------

    /// Fail the run with `Cancelled`. A run being driven elsewhere stops
    /// once its in-flight stage finishes, before any checkpoint; terminal
    /// runs are left alone.
    pub async fn cancel(&self, run_id: &RunId) -> PipelineResult<RunReport> {
        let _guard = match self.acquire(run_id) {
            Ok(guard) => guard,
            Err(PipelineError::Busy(_)) => {
                self.cancel_requests
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(run_id.to_string());
                info!(run_id = %run_id, "cancellation requested for active run");
                return self.report(run_id).await;
            }
            Err(e) => return Err(e),
        };

        let mut snap = self.load(run_id).await?;
        if snap.status.is_terminal() {
            return self.report_for(&snap).await;
        }
        snap.fail(FailureReason::Cancelled);
        self.save(&snap).await?;
        let report = self.report_for(&snap).await?;
        obs::emit_run_finished(run_id.as_str(), snap.status.name(), report.artifacts.len());
        Ok(report)
    }

    pub async fn report(&self, run_id: &RunId) -> PipelineResult<RunReport> {
        let snap = self.load(run_id).await?;
        self.report_for(&snap).await
    }

    pub async fn list(&self) -> PipelineResult<Vec<RunSummary>> {
        Ok(self
            .runs
            .list()
            .await?
            .into_iter()
            .map(RunSummary::from)
            .collect())
    }

    /// Every artifact of a run in sequence order.
    pub async fn artifacts(&self, run_id: &RunId) -> PipelineResult<Vec<Artifact>> {
        self.load(run_id).await?;
        Ok(self.artifacts.get_all(run_id).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn policy_for(&self, snap: &RunSnapshot) -> CheckpointPolicy {
        CheckpointPolicy::standard(snap.variant(), self.config.checkpoint_timeout_secs)
    }

    fn acquire(&self, run_id: &RunId) -> PipelineResult<DriveGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(run_id.to_string()) {
            return Err(PipelineError::Busy(run_id.to_string()));
        }
        Ok(DriveGuard {
            active: &self.active,
            cancel_requests: &self.cancel_requests,
            run_id: run_id.to_string(),
        })
    }

    fn take_cancel(&self, run_id: &RunId) -> bool {
        self.cancel_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(run_id.as_str())
    }

    async fn load(&self, run_id: &RunId) -> PipelineResult<RunSnapshot> {
        let record = self.runs.load(run_id).await?;
        RunSnapshot::from_record(record)
    }

    async fn save(&self, snap: &RunSnapshot) -> PipelineResult<()> {
        self.runs.save(&snap.to_record()?).await?;
        Ok(())
    }

    async fn report_for(&self, snap: &RunSnapshot) -> PipelineResult<RunReport> {
        let artifacts = self.artifacts.get_all(&snap.run_id).await?;
        Ok(RunReport::build(snap, &artifacts))
    }
}

fn failure_reason(stage: StageKind, err: StageError) -> FailureReason {
    match err {
        StageError::MissingInput { stage, input } => FailureReason::MissingInput { stage, input },
        StageError::Validation(message) => FailureReason::Validation { stage, message },
        StageError::Exhausted { attempts, last } => FailureReason::RetriesExhausted {
            stage,
            attempts,
            message: last,
        },
        StageError::Transient(message) => FailureReason::RetriesExhausted {
            stage,
            attempts: 1,
            message,
        },
    }
}
