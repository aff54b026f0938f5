//! Pipeline configuration.
//!
//! Defaults can be overridden by a TOML file and then by `SLOTFORGE_*`
//! environment variables, in that order.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for retry, simulation and review behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retries after the first attempt for transient stage failures
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Per-attempt bound for provider-backed stages
    pub stage_timeout_ms: u64,
    /// Per-attempt bound for the MathModel stage
    pub math_stage_timeout_ms: u64,
    /// Monte Carlo trials per batch
    pub trial_count: u64,
    pub convergence_iteration_budget: u32,
    pub convergence_time_budget_ms: Option<u64>,
    pub rtp_tolerance: f64,
    /// Rejections allowed per stage; one more fails the run
    pub max_rejections: u32,
    /// Pending reviews older than this resolve as auto-approved
    pub checkpoint_timeout_secs: Option<u64>,
    /// `false` behaves like auto mode
    pub hitl_enabled: bool,
    /// Reject unknown feature names instead of warning
    pub strict_features: bool,
    /// Fixed Monte Carlo seed; derived from the run id when unset
    pub simulation_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            stage_timeout_ms: 120_000,
            math_stage_timeout_ms: 600_000,
            trial_count: 200_000,
            convergence_iteration_budget: 20,
            convergence_time_budget_ms: None,
            rtp_tolerance: 0.001,
            max_rejections: 2,
            checkpoint_timeout_secs: Some(7200),
            hitl_enabled: true,
            strict_features: false,
            simulation_seed: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay `SLOTFORGE_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        macro_rules! num {
            ($var:literal, $field:ident) => {
                if let Some(v) = lookup($var) {
                    self.$field = parse_env($var, &v)?;
                }
            };
        }
        macro_rules! opt_num {
            ($var:literal, $field:ident) => {
                if let Some(v) = lookup($var) {
                    self.$field = match v.trim() {
                        "" | "none" => None,
                        _ => Some(parse_env($var, &v)?),
                    };
                }
            };
        }

        num!("SLOTFORGE_MAX_RETRIES", max_retries);
        num!("SLOTFORGE_BACKOFF_BASE_MS", backoff_base_ms);
        num!("SLOTFORGE_STAGE_TIMEOUT_MS", stage_timeout_ms);
        num!("SLOTFORGE_MATH_TIMEOUT_MS", math_stage_timeout_ms);
        num!("SLOTFORGE_TRIAL_COUNT", trial_count);
        num!("SLOTFORGE_CONVERGENCE_ITERATIONS", convergence_iteration_budget);
        opt_num!("SLOTFORGE_CONVERGENCE_TIME_MS", convergence_time_budget_ms);
        num!("SLOTFORGE_RTP_TOLERANCE", rtp_tolerance);
        num!("SLOTFORGE_MAX_REJECTIONS", max_rejections);
        opt_num!("SLOTFORGE_CHECKPOINT_TIMEOUT_SECS", checkpoint_timeout_secs);
        opt_num!("SLOTFORGE_SEED", simulation_seed);

        if let Some(v) = lookup("SLOTFORGE_HITL_ENABLED") {
            self.hitl_enabled = parse_bool("SLOTFORGE_HITL_ENABLED", &v)?;
        }
        if let Some(v) = lookup("SLOTFORGE_STRICT_FEATURES") {
            self.strict_features = parse_bool("SLOTFORGE_STRICT_FEATURES", &v)?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rtp_tolerance > 0.0 && self.rtp_tolerance < 0.1) {
            return Err(ConfigError::Invalid(format!(
                "rtp_tolerance {} must be in (0, 0.1)",
                self.rtp_tolerance
            )));
        }
        if self.trial_count == 0 {
            return Err(ConfigError::Invalid("trial_count must be positive".into()));
        }
        if self.convergence_iteration_budget == 0 {
            return Err(ConfigError::Invalid(
                "convergence_iteration_budget must be at least 1".into(),
            ));
        }
        if self.stage_timeout_ms == 0 || self.math_stage_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stage timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn math_stage_timeout(&self) -> Duration {
        Duration::from_millis(self.math_stage_timeout_ms)
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}
