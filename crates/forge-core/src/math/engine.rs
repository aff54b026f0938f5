//! Monte Carlo simulation of a payout model.
//!
//! Trials run in fixed-size chunks across the rayon pool. Each chunk owns a
//! `SmallRng` seeded from the batch seed and its chunk index, and chunk
//! accumulators are merged in index order, so a given `(model, config)` pair
//! always yields identical statistics regardless of thread count.
//!
//! The random stream consumed by a spin depends only on symbol weights,
//! scatter placement and feature probabilities, never on pay values. Two
//! models that differ only in pays therefore see the same grids under the
//! same seed, which the convergence loop relies on.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::model::{PayoutModel, SymbolTier};
use super::stats::{Accumulator, SimulationStatistics, SpinOutcome};
use super::MathError;
use crate::domain::PayStyle;
use crate::metrics::METRICS;

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Batch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub trials: u64,
    pub seed: u64,
    /// Trials per parallel work unit
    pub chunk_size: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 200_000,
            seed: 42,
            chunk_size: 10_000,
        }
    }
}

impl SimulationConfig {
    pub fn new(trials: u64, seed: u64) -> Self {
        Self {
            trials,
            seed,
            ..Self::default()
        }
    }
}

/// Lookup tables derived once per batch.
struct Compiled<'a> {
    model: &'a PayoutModel,
    /// Cumulative landing weights per reel, indexed by symbol
    cumulative: Vec<Vec<f64>>,
    paying: Vec<usize>,
    wild: Option<usize>,
    scatter: Option<usize>,
    lines: Vec<Vec<usize>>,
    prize_cumulative: Vec<f64>,
}

impl<'a> Compiled<'a> {
    fn new(model: &'a PayoutModel) -> Self {
        let cumulative = (0..model.reels)
            .map(|reel| {
                let mut acc = 0.0;
                model
                    .symbols
                    .iter()
                    .map(|s| {
                        acc += s.weights[reel];
                        acc
                    })
                    .collect()
            })
            .collect();
        let find = |tier: SymbolTier| model.symbols.iter().position(|s| s.tier == tier);
        let paying = model
            .symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.tier, SymbolTier::High | SymbolTier::Low) && !s.pays.is_empty())
            .map(|(i, _)| i)
            .collect();
        let prize_cumulative = model
            .bonus
            .as_ref()
            .map(|b| {
                let mut acc = 0.0;
                b.prize_weights
                    .iter()
                    .map(|w| {
                        acc += w;
                        acc
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            model,
            cumulative,
            paying,
            wild: find(SymbolTier::Wild),
            scatter: find(SymbolTier::Scatter),
            lines: model.paylines(),
            prize_cumulative,
        }
    }

    fn cell(&self, grid: &[usize], reel: usize, row: usize) -> usize {
        grid[reel * self.model.rows + row]
    }

    fn draw_grid(&self, rng: &mut SmallRng, grid: &mut [usize]) {
        let rows = self.model.rows;
        for (reel, cum) in self.cumulative.iter().enumerate() {
            let total = cum.last().copied().unwrap_or(0.0);
            for row in 0..rows {
                let u = rng.random::<f64>() * total;
                let idx = cum.partition_point(|&c| c <= u).min(cum.len() - 1);
                grid[reel * rows + row] = idx;
            }
        }
    }

    fn matches(&self, cell: usize, symbol: usize) -> bool {
        cell == symbol || Some(cell) == self.wild
    }

    /// Pay for a run of `len` reels, using the longest paid length <= `len`.
    fn pay_for(&self, symbol: usize, len: usize) -> Option<(usize, f64)> {
        let pays = &self.model.symbols[symbol].pays;
        if len < 3 || pays.is_empty() {
            return None;
        }
        let used = len.min(pays.len() + 2);
        Some((used, pays[used - 3]))
    }

    /// Left-to-right evaluation; returns (high-tier win, low-tier win).
    fn evaluate(&self, grid: &[usize]) -> (f64, f64) {
        match self.model.pay_style {
            PayStyle::Ways => self.evaluate_ways(grid),
            PayStyle::Lines { count } => self.evaluate_lines(grid, count),
        }
    }

    fn evaluate_ways(&self, grid: &[usize]) -> (f64, f64) {
        let (mut high, mut low) = (0.0, 0.0);
        let mut counts = [0usize; 8];
        for &symbol in &self.paying {
            let mut len = 0;
            for reel in 0..self.model.reels {
                let c = (0..self.model.rows)
                    .filter(|&row| self.matches(self.cell(grid, reel, row), symbol))
                    .count();
                if c == 0 {
                    break;
                }
                counts[reel] = c;
                len += 1;
            }
            if let Some((used, pay)) = self.pay_for(symbol, len) {
                let ways: usize = counts[..used].iter().product();
                let win = pay * ways as f64;
                match self.model.symbols[symbol].tier {
                    SymbolTier::High => high += win,
                    _ => low += win,
                }
            }
        }
        (high, low)
    }

    fn evaluate_lines(&self, grid: &[usize], count: usize) -> (f64, f64) {
        let (mut high, mut low) = (0.0, 0.0);
        for line in self.lines.iter().take(count) {
            let cells: Vec<usize> = line
                .iter()
                .enumerate()
                .map(|(reel, &row)| self.cell(grid, reel, row))
                .collect();
            // all-wild lines do not pay
            let Some(&lead) = cells.iter().find(|&&c| Some(c) != self.wild) else {
                continue;
            };
            if !self.paying.contains(&lead) {
                continue;
            }
            let len = cells.iter().take_while(|&&c| self.matches(c, lead)).count();
            if let Some((_, pay)) = self.pay_for(lead, len) {
                match self.model.symbols[lead].tier {
                    SymbolTier::High => high += pay,
                    _ => low += pay,
                }
            }
        }
        (high, low)
    }

    fn scatters(&self, grid: &[usize]) -> usize {
        match self.scatter {
            Some(sc) => grid.iter().filter(|&&c| c == sc).count(),
            None => 0,
        }
    }

    fn spin(&self, rng: &mut SmallRng, grid: &mut [usize]) -> SpinOutcome {
        self.draw_grid(rng, grid);
        let (base_high, base_low) = self.evaluate(grid);
        let mut out = SpinOutcome {
            base: base_high + base_low,
            high: base_high,
            low: base_low,
            ..SpinOutcome::default()
        };

        if let Some(fs) = &self.model.free_spins {
            let award = |n: usize| -> u32 {
                if n < 3 {
                    0
                } else {
                    fs.awards[(n - 3).min(fs.awards.len() - 1)]
                }
            };
            let mut remaining = award(self.scatters(grid)).min(fs.max_spins);
            if remaining > 0 {
                out.free_spins_triggered = true;
                let mut played = 0u32;
                while remaining > 0 {
                    remaining -= 1;
                    played += 1;
                    self.draw_grid(rng, grid);
                    let (h, l) = self.evaluate(grid);
                    out.high += h * fs.multiplier;
                    out.low += l * fs.multiplier;
                    out.free_spins += (h + l) * fs.multiplier;
                    if fs.retrigger {
                        let headroom = fs.max_spins - played - remaining;
                        remaining += award(self.scatters(grid)).min(headroom);
                    }
                }
                out.free_spins_played = played;
            }
        }

        if let Some(bonus) = &self.model.bonus {
            // Both draws always happen so the stream stays aligned across models.
            let trigger = rng.random::<f64>();
            let pick = rng.random::<f64>() * self.prize_cumulative.last().copied().unwrap_or(0.0);
            if trigger < bonus.trigger_probability {
                let idx = self
                    .prize_cumulative
                    .partition_point(|&c| c <= pick)
                    .min(bonus.prizes.len() - 1);
                out.bonus = bonus.prizes[idx];
                out.bonus_triggered = true;
            }
        }

        out.total = out.base + out.free_spins + out.bonus;
        if out.total > self.model.max_win {
            let k = self.model.max_win / out.total;
            out.total = self.model.max_win;
            out.base *= k;
            out.free_spins *= k;
            out.bonus *= k;
            out.high *= k;
            out.low *= k;
            out.capped = true;
        }
        out
    }
}

fn chunk_seed(seed: u64, chunk: usize) -> u64 {
    seed.wrapping_add((chunk as u64).wrapping_mul(SEED_STRIDE))
}

/// Simulate `config.trials` independent spins of `model`.
pub fn simulate(
    model: &PayoutModel,
    config: &SimulationConfig,
) -> Result<SimulationStatistics, MathError> {
    model.validate()?;
    if config.trials == 0 || config.chunk_size == 0 {
        return Err(MathError::InvalidConfig(
            "trials and chunk_size must be positive".into(),
        ));
    }

    let compiled = Compiled::new(model);
    let cells = model.reels * model.rows;
    let chunk_size = config.chunk_size;
    let chunks = config.trials.div_ceil(chunk_size) as usize;

    let partials: Vec<Accumulator> = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk as u64 * chunk_size;
            let n = chunk_size.min(config.trials - start);
            let mut rng = SmallRng::seed_from_u64(chunk_seed(config.seed, chunk));
            let mut grid = vec![0usize; cells];
            let mut acc = Accumulator::default();
            for _ in 0..n {
                acc.record(&compiled.spin(&mut rng, &mut grid));
            }
            acc
        })
        .collect();

    let mut total = Accumulator::default();
    for part in partials {
        total.merge(part);
    }

    METRICS.inc_simulations();
    METRICS.add_trials(config.trials);

    let stats = total.finish(config.seed);
    tracing::debug!(
        model = %model.name,
        trials = stats.trials,
        rtp = stats.rtp,
        std_dev = stats.std_dev,
        "simulation batch complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetRequest;
    use crate::math::model::{BonusFeature, Symbol};

    fn preset(features: &[&str], volatility: &str) -> PayoutModel {
        let mut req = TargetRequest::new("Engine Test");
        req.requested_features = features.iter().map(|s| s.to_string()).collect();
        req.volatility = volatility.to_string();
        PayoutModel::preset(&req.validate(true).unwrap().0)
    }

    /// Three reels, one row, a single symbol that always lands: every spin pays.
    fn certain_win_model(pay: f64) -> PayoutModel {
        PayoutModel {
            name: "certain".into(),
            reels: 3,
            rows: 1,
            pay_style: PayStyle::Ways,
            symbols: vec![Symbol {
                id: "A".into(),
                tier: SymbolTier::Low,
                weights: vec![1.0; 3],
                pays: vec![pay],
            }],
            free_spins: None,
            bonus: None,
            max_win: 1000.0,
        }
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let model = preset(&["free_spins", "pick_bonus"], "medium");
        let cfg = SimulationConfig::new(40_000, 99);
        let a = simulate(&model, &cfg).unwrap();
        let b = simulate(&model, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_differ() {
        let model = preset(&[], "medium");
        let a = simulate(&model, &SimulationConfig::new(20_000, 1)).unwrap();
        let b = simulate(&model, &SimulationConfig::new(20_000, 2)).unwrap();
        assert_ne!(a.rtp, b.rtp);
    }

    #[test]
    fn test_deterministic_model_has_exact_rtp() {
        let stats = simulate(&certain_win_model(0.97), &SimulationConfig::new(5_000, 3)).unwrap();
        assert!((stats.rtp - 0.97).abs() < 1e-12);
        assert_eq!(stats.hit_frequency, 1.0);
        assert!(stats.std_dev < 1e-9);
        assert!((stats.contributions.low - 0.97).abs() < 1e-12);
    }

    #[test]
    fn test_max_win_caps_each_spin() {
        let mut model = certain_win_model(50.0);
        model.max_win = 10.0;
        let stats = simulate(&model, &SimulationConfig::new(1_000, 3)).unwrap();
        assert_eq!(stats.max_win, 10.0);
        assert_eq!(stats.capped_spins, 1_000);
        assert!((stats.rtp - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_certain_bonus_pays_expected_prize() {
        let mut model = certain_win_model(0.0);
        model.bonus = Some(BonusFeature {
            trigger_probability: 1.0,
            prizes: vec![4.0],
            prize_weights: vec![1.0],
        });
        let stats = simulate(&model, &SimulationConfig::new(2_000, 11)).unwrap();
        assert!((stats.bonus_rtp - 4.0).abs() < 1e-12);
        assert_eq!(stats.bonus_trigger_rate, 1.0);
    }

    #[test]
    fn test_tier_contributions_sum_to_rtp() {
        let model = preset(&["free_spins", "wheel_bonus"], "high");
        let stats = simulate(&model, &SimulationConfig::new(50_000, 5)).unwrap();
        let c = stats.contributions;
        assert!((c.high + c.low + c.bonus - stats.rtp).abs() < 1e-9);
        assert!((stats.base_rtp + stats.feature_rtp() - stats.rtp).abs() < 1e-9);
        assert!(stats.free_spins_trigger_rate > 0.0);
    }

    #[test]
    fn test_pay_scaling_is_linear_under_common_seed() {
        let model = preset(&[], "medium");
        let cfg = SimulationConfig::new(30_000, 17);
        let before = simulate(&model, &cfg).unwrap();
        let mut doubled = model.clone();
        doubled.scale(crate::math::model::Lever::LowPays, 2.0);
        let after = simulate(&doubled, &cfg).unwrap();
        assert!((after.contributions.low - 2.0 * before.contributions.low).abs() < 1e-9);
        assert!((after.contributions.high - before.contributions.high).abs() < 1e-9);
    }

    #[test]
    fn test_lines_mode_runs() {
        let mut req = TargetRequest::new("Lines");
        req.ways_or_lines = "20 lines".into();
        let model = PayoutModel::preset(&req.validate(true).unwrap().0);
        let stats = simulate(&model, &SimulationConfig::new(20_000, 8)).unwrap();
        assert!(stats.rtp > 0.0);
        assert!(stats.hit_frequency > 0.0);
    }

    #[test]
    fn test_zero_trials_rejected() {
        let err = simulate(&certain_win_model(1.0), &SimulationConfig::new(0, 1)).unwrap_err();
        assert!(matches!(err, MathError::InvalidConfig(_)));
    }
}
