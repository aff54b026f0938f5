//! Structured observability hooks for run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for stage, checkpoint and convergence events
//!
//! Events are emitted at `info!` level with an `event` field naming them, so
//! JSON logs can be filtered on `event = "stage.completed"` and similar.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span while a run is driven.
///
/// ```ignore
/// let _span = RunSpan::enter("3f1c...");
/// // every event below carries run_id = "3f1c..."
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span itself, for `Instrument`-ing async drives.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("slotforge.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, variant: &str, theme: &str) {
    info!(event = "run.started", run_id = %run_id, variant = %variant, theme = %theme);
}

pub fn emit_run_finished(run_id: &str, status: &str, artifacts: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        artifacts = artifacts,
    );
}

pub fn emit_stage_started(run_id: &str, stage: &str, attempt: u32, has_feedback: bool) {
    info!(
        event = "stage.started",
        run_id = %run_id,
        stage = %stage,
        attempt = attempt,
        feedback = has_feedback,
    );
}

pub fn emit_stage_completed(run_id: &str, stage: &str, seq: u64, degraded: bool, duration_ms: u64) {
    info!(
        event = "stage.completed",
        run_id = %run_id,
        stage = %stage,
        seq = seq,
        degraded = degraded,
        duration_ms = duration_ms,
    );
}

/// Transient failure that will be retried after `delay_ms`.
pub fn emit_stage_retry(run_id: &str, stage: &str, attempt: u32, delay_ms: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "stage.retry",
        run_id = %run_id,
        stage = %stage,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_stage_failed(run_id: &str, stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", run_id = %run_id, stage = %stage, error = %error);
}

pub fn emit_checkpoint_pending(run_id: &str, checkpoint: &str, stage: &str) {
    info!(
        event = "checkpoint.pending",
        run_id = %run_id,
        checkpoint = %checkpoint,
        stage = %stage,
    );
}

pub fn emit_checkpoint_resolved(run_id: &str, checkpoint: &str, decision: &str) {
    info!(
        event = "checkpoint.resolved",
        run_id = %run_id,
        checkpoint = %checkpoint,
        decision = %decision,
    );
}

pub fn emit_convergence_iteration(iteration: u32, rtp: f64, error: f64, std_dev: f64) {
    info!(
        event = "convergence.iteration",
        iteration = iteration,
        rtp = rtp,
        error = error,
        std_dev = std_dev,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_stage_started("test-run-id", "research", 1, false);
    }
}
