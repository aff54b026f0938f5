//! Global atomic counters for SlotForge observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a run suspends or finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, lock-free.
pub struct Metrics {
    stages_executed: AtomicU64,
    stage_retries: AtomicU64,
    simulations_run: AtomicU64,
    trials_simulated: AtomicU64,
    checkpoints_resolved: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stages_executed: AtomicU64::new(0),
            stage_retries: AtomicU64::new(0),
            simulations_run: AtomicU64::new(0),
            trials_simulated: AtomicU64::new(0),
            checkpoints_resolved: AtomicU64::new(0),
        }
    }

    /// A stage invocation finished (successfully or not).
    pub fn inc_stages(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stages_executed", "counter incremented");
    }

    /// A transient stage failure was retried.
    pub fn inc_retries(&self) {
        self.stage_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_retries", "counter incremented");
    }

    /// A Monte Carlo batch completed.
    pub fn inc_simulations(&self) {
        self.simulations_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_trials(&self, n: u64) {
        self.trials_simulated.fetch_add(n, Ordering::Relaxed);
    }

    /// A review checkpoint received its decision.
    pub fn inc_checkpoints(&self) {
        self.checkpoints_resolved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checkpoints_resolved", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            stages_executed = self.stages_executed(),
            stage_retries = self.stage_retries(),
            simulations_run = self.simulations_run(),
            trials_simulated = self.trials_simulated(),
            checkpoints_resolved = self.checkpoints_resolved(),
        );
    }

    pub fn stages_executed(&self) -> u64 {
        self.stages_executed.load(Ordering::Relaxed)
    }

    pub fn stage_retries(&self) -> u64 {
        self.stage_retries.load(Ordering::Relaxed)
    }

    pub fn simulations_run(&self) -> u64 {
        self.simulations_run.load(Ordering::Relaxed)
    }

    pub fn trials_simulated(&self) -> u64 {
        self.trials_simulated.load(Ordering::Relaxed)
    }

    pub fn checkpoints_resolved(&self) -> u64 {
        self.checkpoints_resolved.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.stages_executed.store(0, Ordering::Relaxed);
        self.stage_retries.store(0, Ordering::Relaxed);
        self.simulations_run.store(0, Ordering::Relaxed);
        self.trials_simulated.store(0, Ordering::Relaxed);
        self.checkpoints_resolved.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_stages();
        m.inc_stages();
        assert_eq!(m.stages_executed(), 2);

        m.inc_retries();
        assert_eq!(m.stage_retries(), 1);

        m.inc_simulations();
        m.add_trials(50_000);
        m.add_trials(25_000);
        assert_eq!(m.simulations_run(), 1);
        assert_eq!(m.trials_simulated(), 75_000);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_stages();
        m.inc_retries();
        m.inc_checkpoints();
        m.add_trials(10);
        m.reset();
        assert_eq!(m.stages_executed(), 0);
        assert_eq!(m.stage_retries(), 0);
        assert_eq!(m.checkpoints_resolved(), 0);
        assert_eq!(m.trials_simulated(), 0);
    }
}
