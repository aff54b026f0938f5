//! Slot mathematics: payout models, Monte Carlo simulation and the
//! convergence loop that tunes a model toward a target RTP.

pub mod converge;
pub mod engine;
pub mod model;
pub mod stats;

pub use converge::{
    converge, converge_until, converge_with, Converged, ConvergenceFailure, ConvergenceTarget, IterationRecord,
    StepFactors,
};
pub use engine::{simulate, SimulationConfig};
pub use model::{BonusFeature, FreeSpinsFeature, Lever, PayoutModel, Symbol, SymbolTier};
pub use stats::{
    ConfidenceInterval, SimulationStatistics, SpinOutcome, TierContributions, WinBucket,
    WinQuantiles,
};

/// Errors from the math engine.
#[derive(Debug, thiserror::Error)]
pub enum MathError {
    #[error("invalid payout model: {0}")]
    InvalidModel(String),

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    /// Budget exhausted; the failure carries the best model found.
    #[error("convergence failed after {} iterations ({}): residual {:+.5}", .0.iterations, .0.reason, .0.residual)]
    NotConverged(Box<ConvergenceFailure>),
}
