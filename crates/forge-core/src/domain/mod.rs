//! Domain models for SlotForge.
//!
//! - `TargetRequest` / `TargetSpec`: what a run is asked to build
//! - `FeatureKind`, `VolatilityClass`, `PayStyle`: validated vocabularies
//! - `jurisdiction`: built-in regulator rules

pub mod error;
pub mod jurisdiction;
pub mod target;

pub use error::{TargetError, TargetResult};
pub use jurisdiction::JurisdictionRules;
pub use target::{FeatureKind, PayStyle, TargetRequest, TargetSpec, VolatilityClass};
