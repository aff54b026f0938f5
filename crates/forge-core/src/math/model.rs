//! Payout model: the parameter set the convergence loop tunes.
//!
//! Structure (grid, pay style, symbol set, feature shapes) is fixed for the
//! lifetime of a model. Only the numeric levers move: symbol pays, bonus
//! prizes, and the weight/probability normalisation that follows each step.

use serde::{Deserialize, Serialize};

use super::MathError;
use crate::domain::{FeatureKind, PayStyle, TargetSpec, VolatilityClass};

/// Role a symbol plays in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolTier {
    High,
    Low,
    /// Substitutes for every paying symbol
    Wild,
    /// Counts anywhere on the grid; triggers free spins
    Scatter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub tier: SymbolTier,
    /// Landing weight per reel (length == reels)
    pub weights: Vec<f64>,
    /// `pays[k]` is the multiplier for `k + 3` of a kind; empty for wild/scatter
    #[serde(default)]
    pub pays: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeSpinsFeature {
    /// `awards[k]` spins for `k + 3` scatters; larger counts use the last entry
    pub awards: Vec<u32>,
    /// Win multiplier applied during free spins
    pub multiplier: f64,
    pub retrigger: bool,
    /// Hard cap on spins played per trigger, retriggers included
    pub max_spins: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusFeature {
    /// Per-spin chance the bonus round triggers
    pub trigger_probability: f64,
    /// Prize multipliers of total bet
    pub prizes: Vec<f64>,
    pub prize_weights: Vec<f64>,
}

/// Parameters the convergence loop may scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lever {
    HighPays,
    LowPays,
    BonusPrizes,
}

/// Complete description of a slot's outcome distribution and payouts.
///
/// All wins are multiples of the total bet; one spin costs 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutModel {
    pub name: String,
    pub reels: usize,
    pub rows: usize,
    pub pay_style: PayStyle,
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub free_spins: Option<FreeSpinsFeature>,
    #[serde(default)]
    pub bonus: Option<BonusFeature>,
    /// Cap on the total return of one spin (feature rounds included)
    pub max_win: f64,
}

fn check_weight(what: &str, v: f64) -> Result<(), MathError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(MathError::InvalidModel(format!("{what} must be finite and >= 0, got {v}")))
    }
}

impl PayoutModel {
    /// Check every structural and numeric invariant.
    pub fn validate(&self) -> Result<(), MathError> {
        if !(3..=8).contains(&self.reels) || !(1..=10).contains(&self.rows) {
            return Err(MathError::InvalidModel(format!(
                "grid {}x{} unsupported",
                self.reels, self.rows
            )));
        }
        if !self.symbols.iter().any(|s| matches!(s.tier, SymbolTier::High | SymbolTier::Low)) {
            return Err(MathError::InvalidModel("no paying symbols".into()));
        }
        for tier in [SymbolTier::Wild, SymbolTier::Scatter] {
            if self.symbols.iter().filter(|s| s.tier == tier).count() > 1 {
                return Err(MathError::InvalidModel(format!("more than one {tier:?} symbol")));
            }
        }
        for sym in &self.symbols {
            if sym.weights.len() != self.reels {
                return Err(MathError::InvalidModel(format!(
                    "symbol {} has {} weights for {} reels",
                    sym.id,
                    sym.weights.len(),
                    self.reels
                )));
            }
            if sym.pays.len() > self.reels.saturating_sub(2) {
                return Err(MathError::InvalidModel(format!(
                    "symbol {} pays more lengths than the grid allows",
                    sym.id
                )));
            }
            for w in &sym.weights {
                check_weight(&format!("weight of {}", sym.id), *w)?;
            }
            for p in &sym.pays {
                check_weight(&format!("pay of {}", sym.id), *p)?;
            }
        }
        for reel in 0..self.reels {
            if self.symbols.iter().map(|s| s.weights[reel]).sum::<f64>() <= 0.0 {
                return Err(MathError::InvalidModel(format!("reel {reel} has zero total weight")));
            }
        }
        if let Some(fs) = &self.free_spins {
            check_weight("free spin multiplier", fs.multiplier)?;
            if fs.awards.is_empty() {
                return Err(MathError::InvalidModel("free spins without awards".into()));
            }
        }
        if let Some(bonus) = &self.bonus {
            if !(0.0..=1.0).contains(&bonus.trigger_probability) {
                return Err(MathError::InvalidModel(format!(
                    "bonus trigger probability {} outside [0,1]",
                    bonus.trigger_probability
                )));
            }
            if bonus.prizes.is_empty() || bonus.prizes.len() != bonus.prize_weights.len() {
                return Err(MathError::InvalidModel("bonus prizes and weights differ in length".into()));
            }
            for v in bonus.prizes.iter().chain(&bonus.prize_weights) {
                check_weight("bonus prize", *v)?;
            }
            if bonus.prize_weights.iter().sum::<f64>() <= 0.0 {
                return Err(MathError::InvalidModel("bonus prize weights sum to zero".into()));
            }
        }
        if !(self.max_win.is_finite() && self.max_win > 0.0) {
            return Err(MathError::InvalidModel("max_win must be positive".into()));
        }
        if let PayStyle::Lines { count } = self.pay_style {
            let available = count_paylines(self.reels, self.rows);
            if count == 0 || count > available {
                return Err(MathError::InvalidModel(format!(
                    "{count} lines requested, {available} available"
                )));
            }
        }
        Ok(())
    }

    /// Re-establish the probability invariants after an adjustment.
    ///
    /// Per-reel weights sum to 1, prize weights sum to 1, probabilities lie in
    /// [0,1] and no weight, pay or prize is negative.
    pub fn normalize(&mut self) {
        for reel in 0..self.reels {
            let total: f64 = self
                .symbols
                .iter()
                .map(|s| s.weights.get(reel).copied().unwrap_or(0.0).max(0.0))
                .sum();
            for sym in &mut self.symbols {
                if let Some(w) = sym.weights.get_mut(reel) {
                    *w = if total > 0.0 { w.max(0.0) / total } else { 0.0 };
                }
            }
        }
        for sym in &mut self.symbols {
            for p in &mut sym.pays {
                *p = p.max(0.0);
            }
        }
        if let Some(bonus) = &mut self.bonus {
            bonus.trigger_probability = bonus.trigger_probability.clamp(0.0, 1.0);
            let total: f64 = bonus.prize_weights.iter().map(|w| w.max(0.0)).sum();
            for w in &mut bonus.prize_weights {
                *w = if total > 0.0 { w.max(0.0) / total } else { 0.0 };
            }
            for p in &mut bonus.prizes {
                *p = p.max(0.0);
            }
        }
    }

    /// Multiply every parameter behind `lever` by `factor`.
    pub fn scale(&mut self, lever: Lever, factor: f64) {
        match lever {
            Lever::HighPays | Lever::LowPays => {
                let tier = if lever == Lever::HighPays {
                    SymbolTier::High
                } else {
                    SymbolTier::Low
                };
                for sym in self.symbols.iter_mut().filter(|s| s.tier == tier) {
                    for p in &mut sym.pays {
                        *p *= factor;
                    }
                }
            }
            Lever::BonusPrizes => {
                if let Some(bonus) = &mut self.bonus {
                    for p in &mut bonus.prizes {
                        *p *= factor;
                    }
                }
            }
        }
    }

    /// The payline set this model evaluates (empty for ways).
    pub fn paylines(&self) -> Vec<Vec<usize>> {
        match self.pay_style {
            PayStyle::Ways => Vec::new(),
            PayStyle::Lines { count } => generate_paylines(self.reels, self.rows, count),
        }
    }

    /// Starting model for a target: the house 5-tier/4-tier symbol set with
    /// feature shapes chosen by volatility class and requested features.
    pub fn preset(spec: &TargetSpec) -> Self {
        let reels = spec.reels;
        let rows = spec.rows;

        // name, tier, weight, pays for 3/4/5 of a kind
        const BASE: &[(&str, SymbolTier, f64, [f64; 3])] = &[
            ("H1", SymbolTier::High, 1.5, [1.0, 4.0, 20.0]),
            ("H2", SymbolTier::High, 1.8, [0.75, 2.5, 12.5]),
            ("H3", SymbolTier::High, 2.0, [0.5, 2.0, 10.0]),
            ("H4", SymbolTier::High, 2.2, [0.4, 1.5, 7.5]),
            ("H5", SymbolTier::High, 2.5, [0.3, 1.25, 5.0]),
            ("L1", SymbolTier::Low, 5.0, [0.2, 0.75, 2.5]),
            ("L2", SymbolTier::Low, 5.5, [0.15, 0.5, 2.0]),
            ("L3", SymbolTier::Low, 6.0, [0.125, 0.4, 1.5]),
            ("L4", SymbolTier::Low, 6.5, [0.1, 0.3, 1.0]),
        ];

        // Keep expected base return roughly constant across grid shapes.
        let reference_ways = 243.0;
        let combos = match spec.pay_style {
            PayStyle::Ways => (rows as f64).powi(reels as i32),
            PayStyle::Lines { count } => count as f64,
        };
        let shape_scale = reference_ways / combos;

        let (high_scale, low_scale) = match spec.volatility {
            VolatilityClass::Low => (0.8, 1.1),
            VolatilityClass::Medium => (1.0, 1.0),
            VolatilityClass::High => (2.0, 0.8),
        };

        let mut symbols: Vec<Symbol> = BASE
            .iter()
            .map(|(id, tier, weight, pays)| {
                let tier_scale = if *tier == SymbolTier::High {
                    high_scale
                } else {
                    low_scale
                };
                Symbol {
                    id: id.to_string(),
                    tier: *tier,
                    weights: vec![*weight; reels],
                    pays: extend_pays(pays, reels)
                        .into_iter()
                        .map(|p| p * tier_scale * shape_scale)
                        .collect(),
                }
            })
            .collect();

        symbols.push(Symbol {
            id: "WD".into(),
            tier: SymbolTier::Wild,
            weights: vec![1.0; reels],
            pays: Vec::new(),
        });

        let wants = |f: FeatureKind| spec.has_feature(f);
        let free_spins = (spec.features.is_empty() || wants(FeatureKind::FreeSpins)).then(|| {
            let base_multiplier = match spec.volatility {
                VolatilityClass::Low => 2.0,
                VolatilityClass::Medium => 3.0,
                VolatilityClass::High => 5.0,
            };
            let bump = if wants(FeatureKind::Multipliers) { 2.0 } else { 0.0 };
            FreeSpinsFeature {
                awards: vec![10, 15, 25],
                multiplier: base_multiplier + bump,
                retrigger: true,
                max_spins: 250,
            }
        });
        if free_spins.is_some() {
            symbols.push(Symbol {
                id: "SC".into(),
                tier: SymbolTier::Scatter,
                weights: vec![0.8; reels],
                pays: Vec::new(),
            });
        }

        let bonus = spec.features.iter().any(FeatureKind::is_bonus_round).then(|| {
            let (prizes, prize_weights) = match spec.volatility {
                VolatilityClass::Low => (
                    vec![2.0, 5.0, 10.0, 20.0, 40.0],
                    vec![40.0, 30.0, 15.0, 10.0, 5.0],
                ),
                VolatilityClass::Medium => (
                    vec![5.0, 10.0, 20.0, 50.0, 100.0],
                    vec![40.0, 30.0, 15.0, 10.0, 5.0],
                ),
                VolatilityClass::High => (
                    vec![10.0, 25.0, 50.0, 200.0, 1000.0],
                    vec![45.0, 30.0, 15.0, 8.0, 2.0],
                ),
            };
            BonusFeature {
                trigger_probability: 0.004,
                prizes,
                prize_weights,
            }
        });

        let mut model = PayoutModel {
            name: format!("{} {}x{} {}", spec.theme, reels, rows, spec.pay_style),
            reels,
            rows,
            pay_style: spec.pay_style,
            symbols,
            free_spins,
            bonus,
            max_win: spec.max_win_multiplier as f64,
        };
        model.normalize();
        model
    }
}

/// Pays for 3..=reels of a kind from a 3/4/5 base, doubling beyond five.
fn extend_pays(base: &[f64; 3], reels: usize) -> Vec<f64> {
    let mut pays: Vec<f64> = base.to_vec();
    while pays.len() < reels - 2 {
        let next = pays.last().copied().unwrap_or(1.0) * 2.0;
        pays.push(next);
    }
    pays.truncate(reels - 2);
    pays
}

/// Number of distinct paylines on the grid: row paths that move by at most
/// one row between adjacent reels.
pub fn count_paylines(reels: usize, rows: usize) -> usize {
    if reels == 0 || rows == 0 {
        return 0;
    }
    let mut counts = vec![1usize; rows];
    for _ in 1..reels {
        counts = (0..rows)
            .map(|r| {
                let lo = r.saturating_sub(1);
                let hi = (r + 1).min(rows - 1);
                counts[lo..=hi].iter().sum()
            })
            .collect();
    }
    counts.iter().sum()
}

/// The first `count` paylines in house order: straight lines first (middle
/// row outward), then by number of row changes, then lexicographically.
pub fn generate_paylines(reels: usize, rows: usize, count: usize) -> Vec<Vec<usize>> {
    let mut all: Vec<Vec<usize>> = (0..rows).map(|r| vec![r]).collect();
    for _ in 1..reels {
        all = all
            .into_iter()
            .flat_map(|path| {
                let last = path[path.len() - 1];
                let lo = last.saturating_sub(1);
                let hi = (last + 1).min(rows - 1);
                (lo..=hi).map(move |next| {
                    let mut p = path.clone();
                    p.push(next);
                    p
                })
            })
            .collect();
    }

    let middle = (rows - 1) / 2;
    all.sort_by_key(|p| {
        let changes = p.windows(2).filter(|w| w[0] != w[1]).count();
        (changes, p[0].abs_diff(middle), p.clone())
    });
    all.truncate(count);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetRequest;

    fn spec_with(features: &[&str], volatility: &str) -> TargetSpec {
        let mut req = TargetRequest::new("Test Theme");
        req.requested_features = features.iter().map(|s| s.to_string()).collect();
        req.volatility = volatility.to_string();
        req.validate(true).unwrap().0
    }

    #[test]
    fn test_preset_is_valid_and_normalized() {
        let model = PayoutModel::preset(&spec_with(&["free_spins", "pick_bonus"], "high"));
        model.validate().unwrap();
        for reel in 0..model.reels {
            let total: f64 = model.symbols.iter().map(|s| s.weights[reel]).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        assert!(model.free_spins.is_some());
        assert!(model.bonus.is_some());
        assert!(model.symbols.iter().any(|s| s.tier == SymbolTier::Scatter));
    }

    #[test]
    fn test_preset_without_free_spins_has_no_scatter() {
        let model = PayoutModel::preset(&spec_with(&["wheel_bonus"], "medium"));
        assert!(model.free_spins.is_none());
        assert!(!model.symbols.iter().any(|s| s.tier == SymbolTier::Scatter));
    }

    #[test]
    fn test_normalize_clamps_probabilities() {
        let mut model = PayoutModel::preset(&spec_with(&["pick_bonus"], "low"));
        if let Some(b) = &mut model.bonus {
            b.trigger_probability = 1.7;
            b.prizes[0] = -3.0;
        }
        model.symbols[0].pays[0] = -1.0;
        model.normalize();
        let bonus = model.bonus.as_ref().unwrap();
        assert_eq!(bonus.trigger_probability, 1.0);
        assert_eq!(bonus.prizes[0], 0.0);
        assert_eq!(model.symbols[0].pays[0], 0.0);
        model.validate().unwrap();
    }

    #[test]
    fn test_scale_touches_only_its_lever() {
        let mut model = PayoutModel::preset(&spec_with(&[], "medium"));
        let h1_before = model.symbols[0].pays.clone();
        let l1_before = model.symbols[5].pays.clone();
        model.scale(Lever::HighPays, 2.0);
        assert_eq!(model.symbols[0].pays[2], h1_before[2] * 2.0);
        assert_eq!(model.symbols[5].pays, l1_before);
    }

    #[test]
    fn test_payline_count_matches_generation() {
        assert_eq!(count_paylines(5, 3), generate_paylines(5, 3, usize::MAX).len());
        assert_eq!(count_paylines(3, 1), 1);
        let lines = generate_paylines(5, 3, 3);
        assert_eq!(lines[0], vec![1, 1, 1, 1, 1]);
        assert!(lines[1..].iter().all(|l| l.windows(2).all(|w| w[0] == w[1])));
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut model = PayoutModel::preset(&spec_with(&[], "medium"));
        model.symbols[0].weights.pop();
        assert!(matches!(model.validate(), Err(MathError::InvalidModel(_))));
    }
}
