//! Stage execution controls: per-attempt timeout and retry with
//! exponential backoff for transient failures.

use std::time::{Duration, Instant};

use forge_core::{obs, PipelineConfig, METRICS};

use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

/// Retry and timeout bounds for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once)
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Bounds from configuration; MathModel gets its own timeout.
    pub fn for_stage(config: &PipelineConfig, kind: StageKind) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            timeout: if kind == StageKind::MathModel {
                config.math_stage_timeout()
            } else {
                config.stage_timeout()
            },
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// A successful invocation.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub output: StageOutput,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Invoke `stage`, retrying transient failures and timeouts.
///
/// `on_retry` is told about each transient failure before its backoff
/// sleep. Non-transient failures return immediately; exhausting the retry
/// bound returns [`StageError::Exhausted`].
pub async fn execute_stage(
    stage: &dyn Stage,
    input: &mut StageInput,
    policy: &RetryPolicy,
    mut on_retry: impl FnMut(u32, &StageError),
) -> Result<StageRun, StageError> {
    let kind = stage.kind();
    let max_attempts = policy.max_retries + 1;
    let start = Instant::now();

    for attempt in 1..=max_attempts {
        input.attempt = attempt;
        obs::emit_stage_started(
            input.run_id.as_str(),
            kind.name(),
            attempt,
            input.feedback.is_some(),
        );

        let err = match tokio::time::timeout(policy.timeout, stage.run(input)).await {
            Ok(Ok(output)) => {
                METRICS.inc_stages();
                return Ok(StageRun {
                    output,
                    attempts: attempt,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
            Ok(Err(e)) => e,
            Err(_elapsed) => StageError::Transient(format!(
                "{kind} timed out after {}ms",
                policy.timeout.as_millis()
            )),
        };
        METRICS.inc_stages();

        if !err.is_transient() {
            return Err(err);
        }
        if attempt == max_attempts {
            return Err(StageError::Exhausted {
                attempts: attempt,
                last: err.to_string(),
            });
        }

        let delay = policy.backoff(attempt);
        METRICS.inc_retries();
        obs::emit_stage_retry(
            input.run_id.as_str(),
            kind.name(),
            attempt,
            delay.as_millis() as u64,
            &err,
        );
        on_retry(attempt, &err);
        tokio::time::sleep(delay).await;
    }

    Err(StageError::Exhausted {
        attempts: max_attempts,
        last: "no attempt ran".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{ReconRequest, RunRequest};
    use async_trait::async_trait;
    use forge_state::RunId;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: StageError,
    }

    #[async_trait]
    impl Stage for Flaky {
        fn kind(&self) -> StageKind {
            StageKind::LegalResearch
        }

        async fn run(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(StageOutput::new(serde_json::json!({ "call": n })))
            }
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Stage for Sleepy {
        fn kind(&self) -> StageKind {
            StageKind::LegalResearch
        }

        async fn run(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StageOutput::new(serde_json::Value::Null))
        }
    }

    fn input() -> StageInput {
        StageInput {
            run_id: RunId::from("runner-test"),
            request: RunRequest::LegalRecon(ReconRequest {
                jurisdiction: "Texas".into(),
                game_hint: None,
            }),
            artifacts: BTreeMap::new(),
            feedback: None,
            attempt: 0,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let stage = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: StageError::Transient("rate limited".into()),
        };
        let mut retries = Vec::new();
        let run = execute_stage(&stage, &mut input(), &policy(3), |a, _| retries.push(a))
            .await
            .unwrap();
        assert_eq!(run.attempts, 3);
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(run.output.payload["call"], 2);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        let stage = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
            error: StageError::Validation("bad schema".into()),
        };
        let err = execute_stage(&stage, &mut input(), &policy(3), |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(err, StageError::Validation("bad schema".into()));
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let stage = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: StageError::Transient("down".into()),
        };
        let err = execute_stage(&stage, &mut input(), &policy(2), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let err = execute_stage(&Sleepy, &mut input(), &policy(1), |_, _| {})
            .await
            .unwrap_err();
        match err {
            StageError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
