//! SlotForge Core Library
//!
//! Target specifications, the payout model, the Monte Carlo engine and the
//! convergence loop, plus the provider interfaces the pipeline stages use.

pub mod config;
pub mod domain;
pub mod math;
pub mod metrics;
pub mod obs;
pub mod providers;
pub mod telemetry;

pub use config::{ConfigError, PipelineConfig};

pub use domain::{
    jurisdiction, FeatureKind, JurisdictionRules, PayStyle, TargetError, TargetRequest,
    TargetResult, TargetSpec, VolatilityClass,
};

pub use math::{
    converge, converge_until, converge_with, simulate, Converged, ConvergenceFailure,
    ConvergenceTarget, IterationRecord, MathError, PayoutModel, SimulationConfig,
    SimulationStatistics,
};

pub use providers::{
    AssetKind, AssetProvider, AssetRef, AssetSpec, ContentProvider, ContentRequest, Document,
    Embedder, HashingEmbedder, PlaceholderAssets, ProviderError, ProviderResult,
    ResearchProvider, StaticResearch, TemplateContent,
};

pub use metrics::METRICS;
pub use obs::RunSpan;
pub use telemetry::init_tracing;

/// SlotForge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
