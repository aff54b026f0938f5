//! Convergence loop: tune a payout model until its simulated RTP lands
//! inside the target band.
//!
//! Each iteration simulates the current model with the *same* seed, so the
//! estimate responds to pay changes without sampling noise (RTP is then
//! linear in each lever). The step is proportional: the signed RTP error is
//! split across the high-pay, low-pay and bonus levers in proportion to their
//! current contribution, weighted toward the levers that move volatility back
//! into the requested class.

use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicBool};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::engine::{simulate, SimulationConfig};
use super::model::{Lever, PayoutModel};
use super::stats::SimulationStatistics;
use super::MathError;
use crate::domain::VolatilityClass;

/// Per-iteration multiplicative bound on any lever.
const MIN_STEP: f64 = 0.5;
const MAX_STEP: f64 = 2.0;
/// Extra allocation weight for levers that pull volatility toward its band.
const VOLATILITY_BIAS: f64 = 3.0;

/// What the loop is converging toward. Immutable for one MathModel run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTarget {
    pub target_rtp: f64,
    pub tolerance: f64,
    pub volatility: VolatilityClass,
    pub iteration_budget: u32,
    #[serde(default)]
    pub time_budget: Option<Duration>,
    pub simulation: SimulationConfig,
}

impl ConvergenceTarget {
    pub fn new(target_rtp: f64, tolerance: f64, volatility: VolatilityClass) -> Self {
        Self {
            target_rtp,
            tolerance,
            volatility,
            iteration_budget: 20,
            time_budget: None,
            simulation: SimulationConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), MathError> {
        if !(self.target_rtp > 0.0 && self.target_rtp.is_finite()) {
            return Err(MathError::InvalidConfig(format!(
                "target RTP {} must be positive",
                self.target_rtp
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(MathError::InvalidConfig("tolerance must be positive".into()));
        }
        if self.iteration_budget == 0 {
            return Err(MathError::InvalidConfig("iteration budget must be at least 1".into()));
        }
        Ok(())
    }
}

/// Multipliers applied to each lever by one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepFactors {
    pub high: f64,
    pub low: f64,
    pub bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub rtp: f64,
    /// target - rtp
    pub error: f64,
    pub std_dev: f64,
    /// Step applied after this iteration (None on the final one)
    pub step: Option<StepFactors>,
}

/// Successful convergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Converged {
    pub model: PayoutModel,
    pub stats: SimulationStatistics,
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
}

/// Budget exhausted without reaching tolerance. Carries the best attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceFailure {
    pub best_model: PayoutModel,
    pub best_stats: SimulationStatistics,
    /// target - best rtp
    pub residual: f64,
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
    pub reason: String,
}

/// Converge `initial` toward `target`. See [`converge_with`].
pub fn converge(
    initial: &PayoutModel,
    target: &ConvergenceTarget,
) -> Result<Converged, MathError> {
    converge_with(initial, target, |_| {})
}

/// Converge `initial` toward `target`, reporting each iteration to `observe`.
///
/// Always terminates: at most `iteration_budget` simulations run, and the
/// wall-clock budget (if any) is checked before every iteration after the
/// first. Exhaustion yields `MathError::NotConverged` with the best model.
pub fn converge_with(
    initial: &PayoutModel,
    target: &ConvergenceTarget,
    observe: impl FnMut(&IterationRecord),
) -> Result<Converged, MathError> {
    converge_until(initial, target, &AtomicBool::new(false), observe)
}

/// [`converge_with`] that also stops before the next iteration once `stop`
/// is set. A stopped loop reports `NotConverged` with the best model so far.
pub fn converge_until(
    initial: &PayoutModel,
    target: &ConvergenceTarget,
    stop: &AtomicBool,
    mut observe: impl FnMut(&IterationRecord),
) -> Result<Converged, MathError> {
    target.validate()?;
    initial.validate()?;

    let started = Instant::now();
    let mut model = initial.clone();
    model.normalize();

    let mut history: Vec<IterationRecord> = Vec::new();
    let mut best: Option<(PayoutModel, SimulationStatistics)> = None;
    let mut reason = format!("iteration budget of {} exhausted", target.iteration_budget);

    for iteration in 1..=target.iteration_budget {
        if iteration > 1 {
            if stop.load(atomic::Ordering::Relaxed) {
                reason = "convergence stopped by caller".into();
                break;
            }
            if let Some(limit) = target.time_budget {
                if started.elapsed() >= limit {
                    reason = format!("time budget of {}ms exhausted", limit.as_millis());
                    break;
                }
            }
        }

        let mut stats = simulate(&model, &target.simulation)?;
        let error = target.target_rtp - stats.rtp;

        let improved = best
            .as_ref()
            .map_or(true, |(_, b)| error.abs() < (target.target_rtp - b.rtp).abs());
        if improved {
            best = Some((model.clone(), stats.clone()));
        }

        if error.abs() <= target.tolerance {
            if let Some(warning) = volatility_warning(target.volatility, stats.std_dev) {
                tracing::warn!(%warning, "RTP converged with volatility outside class");
                stats.warnings.push(warning);
            }
            let record = IterationRecord {
                iteration,
                rtp: stats.rtp,
                error,
                std_dev: stats.std_dev,
                step: None,
            };
            observe(&record);
            history.push(record);
            return Ok(Converged {
                model,
                stats,
                iterations: iteration,
                history,
            });
        }

        let step = if iteration < target.iteration_budget {
            plan_step(&stats, error, target.volatility)
        } else {
            None
        };
        let record = IterationRecord {
            iteration,
            rtp: stats.rtp,
            error,
            std_dev: stats.std_dev,
            step,
        };
        observe(&record);
        history.push(record);

        match step {
            Some(f) => {
                model.scale(Lever::HighPays, f.high);
                model.scale(Lever::LowPays, f.low);
                model.scale(Lever::BonusPrizes, f.bonus);
                model.normalize();
            }
            None if iteration < target.iteration_budget => {
                reason = "model has no payout-contributing parameters to adjust".into();
                break;
            }
            None => {}
        }
    }

    let (best_model, mut best_stats) = match best {
        Some(b) => b,
        None => {
            // time budget cannot trip before the first iteration
            return Err(MathError::InvalidConfig("no iteration ran".into()));
        }
    };
    if let Some(warning) = volatility_warning(target.volatility, best_stats.std_dev) {
        best_stats.warnings.push(warning);
    }
    let residual = target.target_rtp - best_stats.rtp;
    Err(MathError::NotConverged(Box::new(ConvergenceFailure {
        best_model,
        best_stats,
        residual,
        iterations: history.len() as u32,
        history,
        reason,
    })))
}

/// Split `error` across levers. `None` when nothing contributes to RTP.
fn plan_step(
    stats: &SimulationStatistics,
    error: f64,
    volatility: VolatilityClass,
) -> Option<StepFactors> {
    let c = stats.contributions;
    let (mut w_high, mut w_low, mut w_bonus) = (1.0, 1.0, 1.0);
    match (volatility.classify(stats.std_dev), error > 0.0) {
        // too volatile: add return through low pays, remove it from the tail
        (Ordering::Greater, true) => w_low = VOLATILITY_BIAS,
        (Ordering::Greater, false) => {
            w_high = VOLATILITY_BIAS;
            w_bonus = VOLATILITY_BIAS;
        }
        // too flat: the opposite
        (Ordering::Less, true) => {
            w_high = VOLATILITY_BIAS;
            w_bonus = VOLATILITY_BIAS;
        }
        (Ordering::Less, false) => w_low = VOLATILITY_BIAS,
        (Ordering::Equal, _) => {}
    }

    let denom = w_high * c.high + w_low * c.low + w_bonus * c.bonus;
    if denom <= 0.0 {
        return None;
    }
    let factor = |w: f64, contribution: f64| {
        if contribution > 0.0 {
            (1.0 + w * error / denom).clamp(MIN_STEP, MAX_STEP)
        } else {
            1.0
        }
    };
    Some(StepFactors {
        high: factor(w_high, c.high),
        low: factor(w_low, c.low),
        bonus: factor(w_bonus, c.bonus),
    })
}

fn volatility_warning(class: VolatilityClass, std_dev: f64) -> Option<String> {
    let (lo, hi) = class.band();
    match class.classify(std_dev) {
        Ordering::Equal => None,
        Ordering::Less => Some(format!(
            "volatility index {std_dev:.2} below {class} band (>= {lo})"
        )),
        Ordering::Greater => Some(format!(
            "volatility index {std_dev:.2} above {class} band (< {hi})"
        )),
    }
}
