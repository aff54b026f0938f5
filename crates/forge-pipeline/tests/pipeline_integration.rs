//! Integration tests for the run state machine against in-memory and
//! filesystem stores.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forge_core::{PipelineConfig, TargetRequest};
use forge_pipeline::{
    FailureReason, Pipeline, PipelineError, PipelineMode, Providers, ReconRequest, ReviewDecision,
    RunRequest, RunStatus, Stage, StageError, StageInput, StageKind, StageOutput, TransitionKind,
};
use forge_state::fakes::{MemoryArtifactStore, MemoryKnowledgeStore, MemoryRunRepository};
use forge_state::FsStore;
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A stage that plays back scripted results, then succeeds.
struct Scripted {
    kind: StageKind,
    inputs: Vec<StageKind>,
    script: Mutex<VecDeque<Result<Value, StageError>>>,
    calls: AtomicU32,
    feedback: Mutex<Vec<Option<String>>>,
}

impl Scripted {
    fn new(kind: StageKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            feedback: Mutex::new(Vec::new()),
        }
    }

    fn with_inputs(mut self, inputs: &[StageKind]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    fn with_default_inputs(mut self) -> Self {
        self.inputs = self.kind.default_inputs().to_vec();
        self
    }

    fn failing(self, errors: Vec<StageError>) -> Self {
        self.script.lock().unwrap().extend(errors.into_iter().map(Err));
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn feedback_seen(&self) -> Vec<Option<String>> {
        self.feedback.lock().unwrap().clone()
    }
}

#[async_trait]
impl Stage for Scripted {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn inputs(&self) -> Vec<StageKind> {
        self.inputs.clone()
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.feedback.lock().unwrap().push(input.feedback.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Err(e)) => Err(e),
            Some(Ok(v)) => Ok(StageOutput::new(v)),
            None => Ok(StageOutput::new(json!({
                "stage": self.kind.name(),
                "call": call,
                "feedback": input.feedback,
            }))),
        }
    }
}

/// Blocks inside `run` until released.
struct Gated {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Stage for Gated {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    fn inputs(&self) -> Vec<StageKind> {
        Vec::new()
    }

    async fn run(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(StageOutput::new(json!({ "gated": true })))
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 1,
        ..PipelineConfig::default()
    }
}

fn product_request() -> RunRequest {
    let (spec, _) = TargetRequest::new("Gold Rush").validate(false).unwrap();
    RunRequest::Product(spec)
}

fn memory_pipeline(config: PipelineConfig, stages: Vec<Arc<dyn Stage>>) -> Pipeline {
    Pipeline::new(
        Arc::new(MemoryArtifactStore::new()),
        Arc::new(MemoryRunRepository::new()),
        config,
    )
    .with_stages(stages)
}

fn count(report: &forge_pipeline::RunReport, pred: impl Fn(&TransitionKind) -> bool) -> usize {
    report.transitions.iter().filter(|t| pred(&t.kind)).count()
}

/// Transient failures within the retry bound still yield exactly one artifact.
#[tokio::test]
async fn test_transient_failures_retry_to_single_artifact() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(
        Scripted::new(StageKind::MathModel)
            .with_inputs(&[StageKind::Research])
            .failing(vec![
                StageError::Transient("simulator busy".into()),
                StageError::Transient("simulator busy".into()),
            ]),
    );
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>, math.clone()]);

    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Auto,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(math.calls(), 3);
    assert_eq!(report.artifacts_for(StageKind::MathModel).len(), 1);
    assert_eq!(
        count(&report, |k| matches!(k, TransitionKind::StageRetried { .. })),
        2
    );
}

#[tokio::test]
async fn test_retry_exhaustion_fails_run() {
    let research = Arc::new(
        Scripted::new(StageKind::Research).failing(vec![
            StageError::Transient("rate limited".into());
            4
        ]),
    );
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>]);
    let run_id = pipeline
        .create_with_plan(product_request(), PipelineMode::Auto, vec![StageKind::Research])
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();

    assert_eq!(research.calls(), 4);
    match report.failure {
        Some(FailureReason::RetriesExhausted {
            stage, attempts, ..
        }) => {
            assert_eq!(stage, StageKind::Research);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected retries exhausted, got {other:?}"),
    }
    assert!(report.artifacts.is_empty());
}

#[tokio::test]
async fn test_validation_error_fails_without_retry() {
    let research = Arc::new(
        Scripted::new(StageKind::Research)
            .failing(vec![StageError::Validation("no sections".into())]),
    );
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>]);
    let run_id = pipeline
        .create_with_plan(product_request(), PipelineMode::Auto, vec![StageKind::Research])
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();

    assert_eq!(research.calls(), 1);
    assert!(matches!(
        report.failure,
        Some(FailureReason::Validation {
            stage: StageKind::Research,
            ..
        })
    ));
}

/// A stage whose declared input was never produced is never invoked.
#[tokio::test]
async fn test_missing_input_fails_before_invocation() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_default_inputs());
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>, math.clone()]);

    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Auto,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();

    assert_eq!(research.calls(), 1);
    assert_eq!(math.calls(), 0);
    assert_eq!(
        report.failure,
        Some(FailureReason::MissingInput {
            stage: StageKind::MathModel,
            input: StageKind::Design,
        })
    );
}

#[tokio::test]
async fn test_unregistered_stage_in_plan_is_rejected() {
    let pipeline = memory_pipeline(config(), vec![Arc::new(Scripted::new(StageKind::Research)) as Arc<dyn Stage>]);
    let err = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Auto,
            vec![StageKind::Research, StageKind::Design],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStage(StageKind::Design)));
}

/// Approve at each checkpoint until the run completes.
#[tokio::test]
async fn test_interactive_run_suspends_and_approves() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research]));
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>, math.clone()]);
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();

    let report = pipeline.drive(&run_id).await.unwrap();
    assert!(matches!(report.status, RunStatus::Suspended { .. }));
    let pending = report.pending.clone().unwrap();
    assert_eq!(pending.name, "post_research");
    assert_eq!(pending.valid_decisions, vec!["approve", "reject"]);
    assert_eq!(math.calls(), 0);

    // a suspended run does not move on its own
    let again = pipeline.resume(&run_id).await.unwrap();
    assert_eq!(again.status, report.status);

    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(report.pending.as_ref().unwrap().name, "post_design_math");
    assert_eq!(math.calls(), 1);

    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.pending.is_none());
    assert_eq!(report.artifacts.len(), 2);
}

/// Rejections re-run the stage with accumulated feedback until the limit.
#[tokio::test]
async fn test_rejections_rerun_stage_then_fail_at_limit() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>]);
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research],
        )
        .await
        .unwrap();
    pipeline.drive(&run_id).await.unwrap();

    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::reject("cover Ontario too"))
        .await
        .unwrap();
    assert!(matches!(report.status, RunStatus::Suspended { .. }));
    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::reject("cite the statute"))
        .await
        .unwrap();
    assert!(matches!(report.status, RunStatus::Suspended { .. }));
    assert_eq!(research.calls(), 3);
    assert_eq!(report.artifacts_for(StageKind::Research).len(), 3);
    assert_eq!(
        research.feedback_seen(),
        vec![
            None,
            Some("cover Ontario too".to_string()),
            Some("cover Ontario too\ncite the statute".to_string()),
        ]
    );

    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::reject("still wrong"))
        .await
        .unwrap();
    assert_eq!(
        report.failure,
        Some(FailureReason::RejectionLimit {
            stage: StageKind::Research,
            rejections: 3,
        })
    );
    assert_eq!(research.calls(), 3);
}

#[tokio::test]
async fn test_duplicate_decision_is_ignored() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research]));
    let pipeline = memory_pipeline(config(), vec![research.clone() as Arc<dyn Stage>, math.clone()]);
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();
    let first = pipeline.drive(&run_id).await.unwrap();
    let checkpoint_id = first.pending.unwrap().checkpoint_id;

    let after = pipeline
        .submit_decision(&run_id, Some(&checkpoint_id), ReviewDecision::Approve)
        .await
        .unwrap();
    let replay = pipeline
        .submit_decision(&run_id, Some(&checkpoint_id), ReviewDecision::Approve)
        .await
        .unwrap();

    assert_eq!(math.calls(), 1);
    assert_eq!(replay.status, after.status);
    assert_eq!(replay.pending.unwrap().name, "post_design_math");

    let err = pipeline
        .submit_decision(&run_id, Some("no-such-checkpoint"), ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownCheckpoint { .. }));
}

#[tokio::test]
async fn test_decision_on_running_or_finished_run_is_an_error() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let pipeline = memory_pipeline(config(), vec![research as Arc<dyn Stage>]);
    let run_id = pipeline
        .create_with_plan(product_request(), PipelineMode::Auto, vec![StageKind::Research])
        .await
        .unwrap();
    pipeline.drive(&run_id).await.unwrap();

    let err = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotSuspended { .. }));
}

/// Auto mode and disabled review both run straight through.
#[tokio::test]
async fn test_auto_mode_never_suspends() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research]));
    let pipeline = memory_pipeline(
        PipelineConfig {
            hitl_enabled: false,
            ..config()
        },
        vec![research as Arc<dyn Stage>, math],
    );

    // interactive requested, but review is disabled
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.mode, PipelineMode::Auto);
    assert_eq!(
        count(&report, |k| matches!(k, TransitionKind::AutoApproved { .. })),
        2
    );
    assert_eq!(
        count(&report, |k| matches!(k, TransitionKind::Suspended { .. })),
        0
    );
}

#[tokio::test]
async fn test_expired_checkpoint_auto_approves_on_resume() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let pipeline = memory_pipeline(
        PipelineConfig {
            checkpoint_timeout_secs: Some(0),
            ..config()
        },
        vec![research.clone() as Arc<dyn Stage>],
    );
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research],
        )
        .await
        .unwrap();
    let report = pipeline.drive(&run_id).await.unwrap();
    assert!(matches!(report.status, RunStatus::Suspended { .. }));

    let report = pipeline.resume(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(research.calls(), 1);
    assert_eq!(
        count(&report, |k| matches!(k, TransitionKind::AutoApproved { .. })),
        1
    );
}

/// A suspended run survives a process restart when stored on disk.
#[tokio::test]
async fn test_resume_after_restart_with_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    let plan = vec![StageKind::Research, StageKind::MathModel];

    let run_id = {
        let store = Arc::new(FsStore::open(dir.path()).unwrap());
        let pipeline = Pipeline::new(store.clone(), store, config()).with_stages([
            Arc::new(Scripted::new(StageKind::Research)) as Arc<dyn Stage>,
            Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research])),
        ]);
        let run_id = pipeline
            .create_with_plan(product_request(), PipelineMode::Interactive, plan.clone())
            .await
            .unwrap();
        let report = pipeline.drive(&run_id).await.unwrap();
        assert!(matches!(report.status, RunStatus::Suspended { .. }));
        run_id
    };

    let research = Arc::new(Scripted::new(StageKind::Research));
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research]));
    let store = Arc::new(FsStore::open(dir.path()).unwrap());
    let pipeline = Pipeline::new(store.clone(), store, config())
        .with_stages([research.clone() as Arc<dyn Stage>, math.clone()]);

    let report = pipeline.report(&run_id).await.unwrap();
    assert_eq!(report.pending.as_ref().unwrap().name, "post_research");
    assert_eq!(report.artifacts.len(), 1);

    let report = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(research.calls(), 0);
    assert_eq!(math.calls(), 1);
    assert_eq!(report.pending.unwrap().name, "post_design_math");

    let summaries = pipeline.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, "suspended");
}

/// A run persisted but never driven (or abandoned mid-run) continues on resume.
#[tokio::test]
async fn test_resume_picks_up_undriven_run() {
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let runs = Arc::new(MemoryRunRepository::new());
    let research = Arc::new(Scripted::new(StageKind::Research));

    let run_id = Pipeline::new(artifacts.clone(), runs.clone(), config())
        .with_stages([research.clone() as Arc<dyn Stage>])
        .create_with_plan(product_request(), PipelineMode::Auto, vec![StageKind::Research])
        .await
        .unwrap();
    assert_eq!(research.calls(), 0);

    let pipeline = Pipeline::new(artifacts, runs, config())
        .with_stages([research.clone() as Arc<dyn Stage>]);
    let report = pipeline.resume(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(research.calls(), 1);
}

#[tokio::test]
async fn test_cancel_suspended_run() {
    let research = Arc::new(Scripted::new(StageKind::Research));
    let pipeline = memory_pipeline(config(), vec![research as Arc<dyn Stage>]);
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research],
        )
        .await
        .unwrap();
    pipeline.drive(&run_id).await.unwrap();

    let report = pipeline.cancel(&run_id).await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::Cancelled));

    // terminal runs are left alone
    let again = pipeline.cancel(&run_id).await.unwrap();
    assert_eq!(again.transitions.len(), report.transitions.len());

    let err = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotSuspended { .. }));
}

/// A second driver is refused; a cancel while driving stops before the next stage.
#[tokio::test]
async fn test_busy_run_refuses_second_driver_and_honours_cancel() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let math = Arc::new(Scripted::new(StageKind::MathModel).with_inputs(&[StageKind::Research]));
    let pipeline = Arc::new(memory_pipeline(
        config(),
        vec![
            Arc::new(Gated {
                entered: entered.clone(),
                release: release.clone(),
            }) as Arc<dyn Stage>,
            math.clone(),
        ],
    ));
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Auto,
            vec![StageKind::Research, StageKind::MathModel],
        )
        .await
        .unwrap();

    let driver = {
        let pipeline = pipeline.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { pipeline.drive(&run_id).await })
    };
    entered.notified().await;

    let err = pipeline.drive(&run_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Busy(_)));

    pipeline.cancel(&run_id).await.unwrap();
    release.notify_one();

    let report = driver.await.unwrap().unwrap();
    assert_eq!(report.failure, Some(FailureReason::Cancelled));
    assert_eq!(report.artifacts_for(StageKind::Research).len(), 1);
    assert_eq!(math.calls(), 0);
}

/// A cancel that lands while the stage before a checkpoint is in flight
/// ends the run instead of suspending it for review.
#[tokio::test]
async fn test_cancel_during_stage_preempts_checkpoint() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let pipeline = Arc::new(memory_pipeline(
        config(),
        vec![Arc::new(Gated {
            entered: entered.clone(),
            release: release.clone(),
        }) as Arc<dyn Stage>],
    ));
    let run_id = pipeline
        .create_with_plan(
            product_request(),
            PipelineMode::Interactive,
            vec![StageKind::Research],
        )
        .await
        .unwrap();

    let driver = {
        let pipeline = pipeline.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move { pipeline.drive(&run_id).await })
    };
    entered.notified().await;
    pipeline.cancel(&run_id).await.unwrap();
    release.notify_one();

    let report = driver.await.unwrap().unwrap();
    assert_eq!(report.failure, Some(FailureReason::Cancelled));
    assert!(report.pending.is_none());
    assert_eq!(report.artifacts_for(StageKind::Research).len(), 1);
    assert_eq!(
        count(&report, |k| matches!(k, TransitionKind::Suspended { .. })),
        0
    );

    let err = pipeline
        .submit_decision(&run_id, None, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotSuspended { .. }));
}

/// A full offline product run on the filesystem store, where every artifact
/// is read back from disk and digest-checked before the next stage.
#[tokio::test]
async fn test_offline_product_run_on_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsStore::open(dir.path()).unwrap());
    let config = PipelineConfig {
        trial_count: 4_000,
        convergence_iteration_budget: 4,
        simulation_seed: Some(11),
        ..config()
    };
    let providers = Providers::offline(store.clone());
    let stages = forge_pipeline::standard_stages(&providers, &config);
    let pipeline = Pipeline::new(store.clone(), store, config).with_stages(stages);

    let report = pipeline
        .start_product(&TargetRequest::new("Emerald Isle"), PipelineMode::Auto)
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Completed, "{report}");

    let artifacts = pipeline.artifacts(&report.run_id.as_str().into()).await.unwrap();
    assert_eq!(artifacts.len(), 6);
    assert!(artifacts.iter().all(|a| a.verify()));
}

#[tokio::test]
async fn test_unknown_run_is_reported() {
    let pipeline = memory_pipeline(config(), Vec::new());
    let err = pipeline
        .report(&forge_state::RunId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::RunNotFound(_)));
}

fn offline_pipeline() -> Pipeline {
    let config = PipelineConfig {
        trial_count: 4_000,
        convergence_iteration_budget: 4,
        simulation_seed: Some(11),
        ..config()
    };
    let providers = Providers::offline(Arc::new(MemoryKnowledgeStore::new()));
    let stages = forge_pipeline::standard_stages(&providers, &config);
    memory_pipeline(config, stages)
}

/// The complete product pipeline with offline providers.
#[tokio::test]
async fn test_offline_product_run_completes() {
    let pipeline = offline_pipeline();
    let mut target = TargetRequest::new("Pharaoh's Vault");
    target.target_markets = vec!["UK".into(), "Malta".into()];

    let report = pipeline
        .start_product(&target, PipelineMode::Auto)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed, "{report}");
    for kind in forge_pipeline::PipelineVariant::Product.stages() {
        assert_eq!(report.artifacts_for(*kind).len(), 1, "{kind}");
    }

    let artifacts = pipeline.artifacts(&report.run_id.as_str().into()).await.unwrap();
    let package = &artifacts.last().unwrap().payload;
    assert_eq!(package["title"], "Pharaoh's Vault");
    assert_eq!(package["manifest"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_offline_recon_run_completes() {
    let pipeline = offline_pipeline();
    let report = pipeline
        .start_recon(
            ReconRequest {
                jurisdiction: "North Carolina".into(),
                game_hint: Some("skill-based fish table".into()),
            },
            PipelineMode::Auto,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed, "{report}");
    assert_eq!(report.artifacts.len(), 4);
    assert_eq!(report.artifacts_for(StageKind::DefenseBrief).len(), 1);
}

#[tokio::test]
async fn test_invalid_target_is_rejected_before_any_run() {
    let pipeline = offline_pipeline();
    let mut target = TargetRequest::new("   ");
    target.target_rtp = 0.5;
    let err = pipeline
        .start_product(&target, PipelineMode::Auto)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Target(_)));
    assert!(pipeline.list().await.unwrap().is_empty());
}
