//! Aggregation of per-spin outcomes into batch statistics.

use serde::{Deserialize, Serialize};

/// Z-score for a two-sided 99% interval.
const Z_99: f64 = 2.576;

/// Win-multiplier histogram bucket edges (lower bound inclusive, in bet units).
const BUCKETS: [(&str, f64); 8] = [
    ("0x", 0.0),
    ("0-1x", f64::MIN_POSITIVE),
    ("1-2x", 1.0),
    ("2-5x", 2.0),
    ("5-20x", 5.0),
    ("20-100x", 20.0),
    ("100-1000x", 100.0),
    ("1000x+", 1000.0),
];

/// Quantile histogram range: wins from 10^-4 to 10^6 bet, 200 bins per decade.
const HIST_MIN_LOG10: f64 = -4.0;
const HIST_BINS_PER_DECADE: f64 = 200.0;
const HIST_BINS: usize = 2000;

/// Return of one spin, including any feature round it triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpinOutcome {
    pub total: f64,
    pub base: f64,
    pub free_spins: f64,
    pub bonus: f64,
    /// Portion of `total` paid by high-tier symbols (base + free spins)
    pub high: f64,
    /// Portion of `total` paid by low-tier symbols (base + free spins)
    pub low: f64,
    pub free_spins_triggered: bool,
    pub free_spins_played: u32,
    pub bonus_triggered: bool,
    pub capped: bool,
}

/// RTP split by tunable lever; sums to the overall RTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierContributions {
    pub high: f64,
    pub low: f64,
    pub bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinBucket {
    pub label: String,
    pub count: u64,
    pub frequency: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WinQuantiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub p999: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

/// Output of one Monte Carlo batch. RTP values are ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub trials: u64,
    pub seed: u64,
    pub rtp: f64,
    pub base_rtp: f64,
    pub free_spins_rtp: f64,
    pub bonus_rtp: f64,
    pub contributions: TierContributions,
    pub variance: f64,
    /// Volatility index: standard deviation of per-spin return
    pub std_dev: f64,
    pub standard_error: f64,
    pub rtp_ci_99: ConfidenceInterval,
    pub hit_frequency: f64,
    pub max_win: f64,
    pub capped_spins: u64,
    pub free_spins_trigger_rate: f64,
    /// Mean base spins between free spin triggers
    pub spins_per_free_spins_trigger: Option<f64>,
    pub average_free_spins_per_trigger: Option<f64>,
    pub bonus_trigger_rate: f64,
    pub buckets: Vec<WinBucket>,
    pub quantiles: WinQuantiles,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl SimulationStatistics {
    /// Return from feature rounds (free spins and bonus).
    pub fn feature_rtp(&self) -> f64 {
        self.free_spins_rtp + self.bonus_rtp
    }
}

/// Log-spaced histogram of non-zero wins.
///
/// Each bin keeps its count and smallest win, so a quantile read from it is
/// an observed win no more than one bin width (about 1.2%) below the exact one.
#[derive(Debug, Clone)]
struct WinHistogram {
    counts: Vec<u64>,
    mins: Vec<f64>,
}

impl Default for WinHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; HIST_BINS],
            mins: vec![f64::INFINITY; HIST_BINS],
        }
    }
}

impl WinHistogram {
    fn bin(win: f64) -> usize {
        let pos = ((win.log10() - HIST_MIN_LOG10) * HIST_BINS_PER_DECADE).floor();
        pos.clamp(0.0, (HIST_BINS - 1) as f64) as usize
    }

    fn record(&mut self, win: f64) {
        let b = Self::bin(win);
        self.counts[b] += 1;
        self.mins[b] = self.mins[b].min(win);
    }

    fn merge(&mut self, other: &WinHistogram) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        for (a, b) in self.mins.iter_mut().zip(&other.mins) {
            *a = a.min(*b);
        }
    }

    /// Approximate `rank`-th smallest win (0-based).
    fn value_at(&self, rank: u64) -> f64 {
        let mut seen = 0;
        for (count, min) in self.counts.iter().zip(&self.mins) {
            seen += count;
            if rank < seen {
                return *min;
            }
        }
        0.0
    }
}

/// Running sums for one chunk of trials. Merged in chunk order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Accumulator {
    trials: u64,
    sum: f64,
    sum_sq: f64,
    base: f64,
    free_spins: f64,
    bonus: f64,
    high: f64,
    low: f64,
    hits: u64,
    capped: u64,
    fs_triggers: u64,
    fs_played: u64,
    bonus_triggers: u64,
    max_win: f64,
    buckets: [u64; 8],
    wins: WinHistogram,
}

impl Accumulator {
    pub(crate) fn record(&mut self, o: &SpinOutcome) {
        self.trials += 1;
        self.sum += o.total;
        self.sum_sq += o.total * o.total;
        self.base += o.base;
        self.free_spins += o.free_spins;
        self.bonus += o.bonus;
        self.high += o.high;
        self.low += o.low;
        if o.total > 0.0 {
            self.hits += 1;
            self.wins.record(o.total);
        }
        if o.capped {
            self.capped += 1;
        }
        if o.free_spins_triggered {
            self.fs_triggers += 1;
            self.fs_played += o.free_spins_played as u64;
        }
        if o.bonus_triggered {
            self.bonus_triggers += 1;
        }
        self.max_win = self.max_win.max(o.total);
        let idx = BUCKETS
            .iter()
            .rposition(|(_, lo)| o.total >= *lo)
            .unwrap_or(0);
        self.buckets[idx] += 1;
    }

    pub(crate) fn merge(&mut self, other: Accumulator) {
        self.trials += other.trials;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.base += other.base;
        self.free_spins += other.free_spins;
        self.bonus += other.bonus;
        self.high += other.high;
        self.low += other.low;
        self.hits += other.hits;
        self.capped += other.capped;
        self.fs_triggers += other.fs_triggers;
        self.fs_played += other.fs_played;
        self.bonus_triggers += other.bonus_triggers;
        self.max_win = self.max_win.max(other.max_win);
        for (a, b) in self.buckets.iter_mut().zip(other.buckets) {
            *a += b;
        }
        self.wins.merge(&other.wins);
    }

    pub(crate) fn finish(self, seed: u64) -> SimulationStatistics {
        let n = self.trials.max(1) as f64;
        let rtp = self.sum / n;
        let variance = (self.sum_sq / n - rtp * rtp).max(0.0);
        let std_dev = variance.sqrt();
        let standard_error = std_dev / n.sqrt();

        let zeros = self.trials - self.hits;
        let quantile = |q: f64| -> f64 {
            if self.trials == 0 {
                return 0.0;
            }
            let k = ((q * self.trials as f64).ceil() as u64).clamp(1, self.trials) - 1;
            if k < zeros {
                0.0
            } else {
                self.wins.value_at(k - zeros)
            }
        };
        let quantiles = WinQuantiles {
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
            p999: quantile(0.999),
        };

        let buckets = BUCKETS
            .iter()
            .zip(self.buckets)
            .map(|((label, _), count)| WinBucket {
                label: label.to_string(),
                count,
                frequency: count as f64 / n,
            })
            .collect();

        SimulationStatistics {
            trials: self.trials,
            seed,
            rtp,
            base_rtp: self.base / n,
            free_spins_rtp: self.free_spins / n,
            bonus_rtp: self.bonus / n,
            contributions: TierContributions {
                high: self.high / n,
                low: self.low / n,
                bonus: self.bonus / n,
            },
            variance,
            std_dev,
            standard_error,
            rtp_ci_99: ConfidenceInterval {
                low: rtp - Z_99 * standard_error,
                high: rtp + Z_99 * standard_error,
            },
            hit_frequency: self.hits as f64 / n,
            max_win: self.max_win,
            capped_spins: self.capped,
            free_spins_trigger_rate: self.fs_triggers as f64 / n,
            spins_per_free_spins_trigger: (self.fs_triggers > 0)
                .then(|| n / self.fs_triggers as f64),
            average_free_spins_per_trigger: (self.fs_triggers > 0)
                .then(|| self.fs_played as f64 / self.fs_triggers as f64),
            bonus_trigger_rate: self.bonus_triggers as f64 / n,
            buckets,
            quantiles,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(total: f64) -> SpinOutcome {
        SpinOutcome {
            total,
            base: total,
            low: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_finish_computes_moments() {
        let mut acc = Accumulator::default();
        for w in [0.0, 0.0, 2.0, 2.0] {
            acc.record(&outcome(w));
        }
        let stats = acc.finish(7);
        assert_eq!(stats.trials, 4);
        assert!((stats.rtp - 1.0).abs() < 1e-12);
        assert!((stats.variance - 1.0).abs() < 1e-12);
        assert!((stats.hit_frequency - 0.5).abs() < 1e-12);
        assert_eq!(stats.max_win, 2.0);
        assert_eq!(stats.seed, 7);
    }

    #[test]
    fn test_buckets_partition_all_spins() {
        let mut acc = Accumulator::default();
        for w in [0.0, 0.5, 1.0, 3.0, 10.0, 50.0, 500.0, 5000.0] {
            acc.record(&outcome(w));
        }
        let stats = acc.finish(0);
        let counts: Vec<u64> = stats.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1; 8]);
    }

    #[test]
    fn test_quantiles_account_for_zero_spins() {
        let mut acc = Accumulator::default();
        for _ in 0..90 {
            acc.record(&outcome(0.0));
        }
        for i in 1..=10 {
            acc.record(&outcome(i as f64));
        }
        let stats = acc.finish(0);
        assert_eq!(stats.quantiles.p50, 0.0);
        assert_eq!(stats.quantiles.p90, 0.0);
        assert_eq!(stats.quantiles.p99, 9.0);
    }

    #[test]
    fn test_quantiles_stay_within_one_bin() {
        let mut acc = Accumulator::default();
        for i in 1..=100_000 {
            acc.record(&outcome(i as f64 * 0.001));
        }
        assert_eq!(acc.wins.counts.len(), HIST_BINS);

        let stats = acc.finish(0);
        // exact median is 50.0
        let p50 = stats.quantiles.p50;
        assert!(p50 <= 50.0);
        assert!((50.0 - p50) / 50.0 < 0.012, "p50 {p50}");
        assert!((stats.quantiles.p999 - 99.9).abs() / 99.9 < 0.012);
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let wins = [0.0, 1.5, 0.2, 7.0, 0.0, 3.3];
        let mut whole = Accumulator::default();
        wins.iter().for_each(|w| whole.record(&outcome(*w)));

        let mut left = Accumulator::default();
        let mut right = Accumulator::default();
        wins[..3].iter().for_each(|w| left.record(&outcome(*w)));
        wins[3..].iter().for_each(|w| right.record(&outcome(*w)));
        left.merge(right);

        let (merged, single) = (left.finish(1), whole.finish(1));
        assert!((merged.rtp - single.rtp).abs() < 1e-12);
        assert!((merged.variance - single.variance).abs() < 1e-12);
        assert_eq!(merged.buckets, single.buckets);
        assert_eq!(merged.quantiles, single.quantiles);
        assert_eq!(merged.hit_frequency, single.hit_frequency);
    }
}
