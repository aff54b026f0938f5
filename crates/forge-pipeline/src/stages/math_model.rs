//! MathModel: converge the preset payout model on the target RTP.
//!
//! Convergence is CPU-bound and runs on the blocking pool. A budget
//! exhaustion is not a stage failure: the best model found is written as a
//! degraded artifact and the run continues.
//!
//! Reviewer feedback is read as directives ("lower volatility",
//! "rtp 95.5", "max win 2500x", "raise hit frequency") applied to the
//! target before the preset is built. Feedback that names no directive is
//! reported back as a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_core::math::{IterationRecord, SymbolTier};
use forge_core::{
    converge_until, obs, ConvergenceTarget, MathError, PayoutModel, PipelineConfig,
    SimulationConfig, SimulationStatistics, TargetSpec, VolatilityClass,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

/// Reel-weight multiplier on low-pay symbols per hit-frequency directive.
const HIT_FREQUENCY_STEP: f64 = 1.3;

/// Payload of a MathModel artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathArtifact {
    pub converged: bool,
    pub model: PayoutModel,
    pub stats: SimulationStatistics,
    pub target_rtp: f64,
    pub tolerance: f64,
    /// `target_rtp - stats.rtp`
    pub residual: f64,
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
    pub seed: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub review_notes: Option<String>,
    /// Directives taken from review notes, e.g. "volatility -> low"
    #[serde(default)]
    pub applied_feedback: Vec<String>,
}

/// Stable per-run seed so re-invocations simulate the same spins.
pub(crate) fn seed_for_run(run_id: &str) -> u64 {
    let digest = Sha256::digest(run_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Target adjustments requested in review feedback.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct MathDirectives {
    volatility: Option<VolatilityClass>,
    target_rtp: Option<f64>,
    max_win: Option<u32>,
    hit_frequency: Option<f64>,
    applied: Vec<String>,
    ignored: Vec<String>,
}

impl MathDirectives {
    /// Read every clause of `feedback`. Repeated volatility and hit-frequency
    /// directives compound; RTP and max-win directives keep the last value.
    pub(crate) fn parse(feedback: &str, base: VolatilityClass) -> Self {
        let mut d = Self::default();
        let clauses = feedback
            .split([';', '\n'])
            .flat_map(|c| c.split(", "))
            .flat_map(|c| c.split(" and "))
            .map(str::trim)
            .filter(|c| !c.is_empty());

        for clause in clauses {
            let text = clause.to_lowercase();
            let up = ["raise", "increase", "higher", "more", "boost"]
                .iter()
                .any(|w| text.contains(w));
            let down = ["lower", "reduce", "decrease", "less", "fewer"]
                .iter()
                .any(|w| text.contains(w));

            if text.contains("volatil") || text.contains("variance") {
                let current = d.volatility.unwrap_or(base);
                let next = match (up, down) {
                    (false, true) => Some(calmer(current)),
                    (true, false) => Some(wilder(current)),
                    _ => text
                        .split_whitespace()
                        .find_map(|w| w.parse::<VolatilityClass>().ok()),
                };
                match next {
                    Some(v) => {
                        d.volatility = Some(v);
                        d.applied.push(format!("volatility -> {v}"));
                    }
                    None => d.ignored.push(clause.to_string()),
                }
            } else if ["hit freq", "hit rate", "frequent"].iter().any(|w| text.contains(w)) {
                let step = match (up, down) {
                    (true, false) => HIT_FREQUENCY_STEP,
                    (false, true) => 1.0 / HIT_FREQUENCY_STEP,
                    _ => {
                        d.ignored.push(clause.to_string());
                        continue;
                    }
                };
                let factor = d.hit_frequency.unwrap_or(1.0) * step;
                d.hit_frequency = Some(factor);
                d.applied.push(format!("low-pay weight x{factor:.2}"));
            } else if text.contains("rtp") {
                let ratio = first_number(&text).map(|n| if n > 1.0 { n / 100.0 } else { n });
                match ratio.filter(|r| (0.75..=0.99).contains(r)) {
                    Some(r) => {
                        d.target_rtp = Some(r);
                        d.applied.push(format!("target RTP -> {r:.4}"));
                    }
                    None => d.ignored.push(clause.to_string()),
                }
            } else if ["max win", "max_win", "win cap"].iter().any(|w| text.contains(w)) {
                let cap = first_number(&text)
                    .filter(|n| (100.0..=250_000.0).contains(n))
                    .map(|n| n.round() as u32);
                match cap {
                    Some(m) => {
                        d.max_win = Some(m);
                        d.applied.push(format!("max win -> {m}x"));
                    }
                    None => d.ignored.push(clause.to_string()),
                }
            } else {
                d.ignored.push(clause.to_string());
            }
        }
        d
    }

    /// The adjusted target and its starting model.
    fn apply(&self, spec: &TargetSpec) -> (TargetSpec, PayoutModel) {
        let mut spec = spec.clone();
        if let Some(v) = self.volatility {
            spec.volatility = v;
        }
        if let Some(r) = self.target_rtp {
            spec.target_rtp = r;
        }
        if let Some(m) = self.max_win {
            spec.max_win_multiplier = m;
        }
        let mut model = PayoutModel::preset(&spec);
        if let Some(factor) = self.hit_frequency {
            for sym in model.symbols.iter_mut().filter(|s| s.tier == SymbolTier::Low) {
                for w in &mut sym.weights {
                    *w *= factor;
                }
            }
            model.normalize();
        }
        (spec, model)
    }

    fn warnings(&self) -> Vec<String> {
        self.ignored
            .iter()
            .map(|c| format!("math feedback not applied: '{c}'"))
            .collect()
    }
}

fn calmer(v: VolatilityClass) -> VolatilityClass {
    match v {
        VolatilityClass::High => VolatilityClass::Medium,
        _ => VolatilityClass::Low,
    }
}

fn wilder(v: VolatilityClass) -> VolatilityClass {
    match v {
        VolatilityClass::Low => VolatilityClass::Medium,
        _ => VolatilityClass::High,
    }
}

/// First decimal number in `text`, ignoring digit grouping and suffixes
/// such as "%" or "x".
fn first_number(text: &str) -> Option<f64> {
    text.replace([',', '_'], "")
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .find_map(|t| t.parse().ok())
}

/// Sets the flag when the stage future is dropped, e.g. by its timeout.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct MathModelStage {
    config: PipelineConfig,
}

impl MathModelStage {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    fn convergence_target(&self, spec: &TargetSpec, input: &StageInput) -> ConvergenceTarget {
        let seed = self
            .config
            .simulation_seed
            .unwrap_or_else(|| seed_for_run(input.run_id.as_str()));
        // never outlive the stage timeout
        let stage_limit = self.config.math_stage_timeout();
        let time_budget = self
            .config
            .convergence_time_budget_ms
            .map(Duration::from_millis)
            .map_or(stage_limit, |budget| budget.min(stage_limit));
        ConvergenceTarget {
            target_rtp: spec.target_rtp,
            tolerance: self.config.rtp_tolerance,
            volatility: spec.volatility,
            iteration_budget: self.config.convergence_iteration_budget,
            time_budget: Some(time_budget),
            simulation: SimulationConfig::new(self.config.trial_count, seed),
        }
    }
}

#[async_trait]
impl Stage for MathModelStage {
    fn kind(&self) -> StageKind {
        StageKind::MathModel
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        input.payload(StageKind::MathModel, StageKind::Design)?;
        let spec = input.request.target()?;
        let directives = input
            .feedback
            .as_deref()
            .map(|f| MathDirectives::parse(f, spec.volatility))
            .unwrap_or_default();
        let (spec, initial) = directives.apply(spec);
        let target = self.convergence_target(&spec, input);
        let (target_rtp, tolerance, seed) =
            (target.target_rtp, target.tolerance, target.simulation.seed);
        if !directives.applied.is_empty() {
            tracing::info!(applied = ?directives.applied, "math feedback applied");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(stop.clone());
        let result = tokio::task::spawn_blocking(move || {
            converge_until(&initial, &target, &stop, |rec| {
                obs::emit_convergence_iteration(rec.iteration, rec.rtp, rec.error, rec.std_dev)
            })
        })
        .await
        .map_err(|e| StageError::Validation(format!("convergence task aborted: {e}")))?;

        let review_notes = input.feedback.clone();
        let applied_feedback = directives.applied.clone();
        match result {
            Ok(done) => {
                let mut warnings = directives.warnings();
                warnings.extend(done.stats.warnings.iter().cloned());
                let artifact = MathArtifact {
                    converged: true,
                    residual: target_rtp - done.stats.rtp,
                    model: done.model,
                    stats: done.stats,
                    target_rtp,
                    tolerance,
                    iterations: done.iterations,
                    history: done.history,
                    seed,
                    reason: None,
                    review_notes,
                    applied_feedback,
                };
                Ok(StageOutput::new(serde_json::to_value(&artifact)?).with_warnings(warnings))
            }
            Err(MathError::NotConverged(failure)) => {
                let failure = *failure;
                tracing::warn!(
                    residual = failure.residual,
                    iterations = failure.iterations,
                    reason = %failure.reason,
                    "convergence budget exhausted; keeping best model"
                );
                let mut warnings = vec![format!(
                    "math model did not converge ({}): residual {:+.5}",
                    failure.reason, failure.residual
                )];
                warnings.extend(directives.warnings());
                warnings.extend(failure.best_stats.warnings.iter().cloned());
                let artifact = MathArtifact {
                    converged: false,
                    model: failure.best_model,
                    stats: failure.best_stats,
                    target_rtp,
                    tolerance,
                    residual: failure.residual,
                    iterations: failure.iterations,
                    history: failure.history,
                    seed,
                    reason: Some(failure.reason),
                    review_notes,
                    applied_feedback,
                };
                Ok(StageOutput::new(serde_json::to_value(&artifact)?)
                    .degraded(true)
                    .with_warnings(warnings))
            }
            Err(other) => Err(StageError::Validation(other.to_string())),
        }
    }
}
