//! Domain-level error taxonomy for SlotForge.

/// Errors produced while validating a target specification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TargetError {
    #[error("theme must not be empty")]
    EmptyTheme,

    #[error("at least one target market is required")]
    NoMarkets,

    #[error("target RTP {0}% outside 75..=99")]
    RtpOutOfRange(f64),

    #[error("grid {reels}x{rows} outside supported range (reels 3..=8, rows 1..=10)")]
    GridOutOfRange { reels: usize, rows: usize },

    #[error("max win multiplier {0} outside 100..=250000")]
    MaxWinOutOfRange(u32),

    #[error("unknown volatility '{0}'")]
    UnknownVolatility(String),

    #[error("unrecognized pay style '{0}' (expected e.g. '243 ways' or '20 lines')")]
    UnknownPayStyle(String),

    #[error("{lines} paylines requested but the grid only has {available} distinct lines")]
    TooManyLines { lines: usize, available: usize },

    #[error("unknown features: {}", .0.join(", "))]
    UnknownFeatures(Vec<String>),
}

/// Result type for target validation.
pub type TargetResult<T> = std::result::Result<T, TargetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_features_lists_every_name() {
        let err = TargetError::UnknownFeatures(vec!["laser_reels".into(), "moon_bonus".into()]);
        let msg = err.to_string();
        assert!(msg.contains("laser_reels"));
        assert!(msg.contains("moon_bonus"));
    }

    #[test]
    fn test_grid_error_display() {
        let err = TargetError::GridOutOfRange { reels: 12, rows: 3 };
        assert!(err.to_string().contains("12x3"));
    }
}
