//! Target specification: what the caller asks the pipeline to build.
//!
//! `TargetRequest` is the loose, user-facing shape (CLI flags, JSON). It is
//! validated once at the pipeline boundary into a `TargetSpec`, which the
//! stages consume.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{TargetError, TargetResult};

/// Requested volatility class.
///
/// The finer tiers used by design documents (`medium_low`, `very_high`, ...)
/// collapse onto the nearest class when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityClass {
    Low,
    Medium,
    High,
}

impl VolatilityClass {
    /// Accepted band for the per-spin standard deviation (volatility index),
    /// in units of total bet. Upper bound is exclusive.
    pub fn band(&self) -> (f64, f64) {
        match self {
            VolatilityClass::Low => (0.0, 4.0),
            VolatilityClass::Medium => (4.0, 9.0),
            VolatilityClass::High => (9.0, f64::INFINITY),
        }
    }

    /// Where `std_dev` falls relative to this class's band.
    pub fn classify(&self, std_dev: f64) -> std::cmp::Ordering {
        let (lo, hi) = self.band();
        if std_dev < lo {
            std::cmp::Ordering::Less
        } else if std_dev >= hi {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityClass::Low => "low",
            VolatilityClass::Medium => "medium",
            VolatilityClass::High => "high",
        }
    }
}

impl fmt::Display for VolatilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolatilityClass {
    type Err = TargetError;

    fn from_str(s: &str) -> TargetResult<Self> {
        match normalize_name(s).as_str() {
            "low" | "medium_low" => Ok(VolatilityClass::Low),
            "medium" | "med" => Ok(VolatilityClass::Medium),
            "medium_high" | "high" | "very_high" => Ok(VolatilityClass::High),
            _ => Err(TargetError::UnknownVolatility(s.to_string())),
        }
    }
}

/// How wins are evaluated on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayStyle {
    /// Every left-to-right combination of adjacent reels pays.
    Ways,
    /// A fixed set of paylines.
    Lines { count: usize },
}

impl fmt::Display for PayStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayStyle::Ways => f.write_str("ways"),
            PayStyle::Lines { count } => write!(f, "{count} lines"),
        }
    }
}

impl FromStr for PayStyle {
    type Err = TargetError;

    /// Accepts "ways", "243 ways", "20 lines", "25 paylines".
    fn from_str(s: &str) -> TargetResult<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let mut parts = lower.split_whitespace();
        let (first, second) = (parts.next(), parts.next());
        match (first, second) {
            (Some("ways"), None) => Ok(PayStyle::Ways),
            (Some(_), Some("ways")) => Ok(PayStyle::Ways),
            (Some(n), Some("lines" | "paylines" | "line")) => n
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(|count| PayStyle::Lines { count })
                .ok_or_else(|| TargetError::UnknownPayStyle(s.to_string())),
            _ => Err(TargetError::UnknownPayStyle(s.to_string())),
        }
    }
}

/// Game features a design may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    FreeSpins,
    Multipliers,
    ExpandingWilds,
    StickyWilds,
    WalkingWilds,
    CascadingReels,
    PickBonus,
    WheelBonus,
    ProgressiveJackpot,
    Megaways,
    ClusterPays,
    HoldAndSpin,
    BonusBuy,
    MysterySymbols,
    SplitSymbols,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 15] = [
        FeatureKind::FreeSpins,
        FeatureKind::Multipliers,
        FeatureKind::ExpandingWilds,
        FeatureKind::StickyWilds,
        FeatureKind::WalkingWilds,
        FeatureKind::CascadingReels,
        FeatureKind::PickBonus,
        FeatureKind::WheelBonus,
        FeatureKind::ProgressiveJackpot,
        FeatureKind::Megaways,
        FeatureKind::ClusterPays,
        FeatureKind::HoldAndSpin,
        FeatureKind::BonusBuy,
        FeatureKind::MysterySymbols,
        FeatureKind::SplitSymbols,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::FreeSpins => "free_spins",
            FeatureKind::Multipliers => "multipliers",
            FeatureKind::ExpandingWilds => "expanding_wilds",
            FeatureKind::StickyWilds => "sticky_wilds",
            FeatureKind::WalkingWilds => "walking_wilds",
            FeatureKind::CascadingReels => "cascading_reels",
            FeatureKind::PickBonus => "pick_bonus",
            FeatureKind::WheelBonus => "wheel_bonus",
            FeatureKind::ProgressiveJackpot => "progressive_jackpot",
            FeatureKind::Megaways => "megaways",
            FeatureKind::ClusterPays => "cluster_pays",
            FeatureKind::HoldAndSpin => "hold_and_spin",
            FeatureKind::BonusBuy => "bonus_buy",
            FeatureKind::MysterySymbols => "mystery_symbols",
            FeatureKind::SplitSymbols => "split_symbols",
        }
    }

    /// Features the Monte Carlo engine models as an instant-prize bonus.
    pub fn is_bonus_round(&self) -> bool {
        matches!(
            self,
            FeatureKind::PickBonus
                | FeatureKind::WheelBonus
                | FeatureKind::HoldAndSpin
                | FeatureKind::ProgressiveJackpot
        )
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let name = normalize_name(s);
        let name = match name.as_str() {
            "freespins" | "free_spin" => "free_spins",
            "multiplier" => "multipliers",
            "cascades" | "tumble" | "avalanche" => "cascading_reels",
            "hold_and_win" | "hold_n_spin" => "hold_and_spin",
            "buy_feature" | "feature_buy" => "bonus_buy",
            "jackpot" => "progressive_jackpot",
            other => other,
        };
        FeatureKind::ALL
            .into_iter()
            .find(|f| f.as_str() == name)
            .ok_or_else(|| s.to_string())
    }
}

/// "Free Spins", "free-spins" and "free_spins" all normalise to "free_spins".
fn normalize_name(s: &str) -> String {
    s.trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

/// Unvalidated request as supplied by a CLI or API caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub theme: String,
    #[serde(default = "default_markets")]
    pub target_markets: Vec<String>,
    #[serde(default = "default_volatility")]
    pub volatility: String,
    /// Percentage, e.g. 96.5
    #[serde(default = "default_rtp")]
    pub target_rtp: f64,
    #[serde(default = "default_reels")]
    pub reels: usize,
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_pay_style")]
    pub ways_or_lines: String,
    #[serde(default = "default_max_win")]
    pub max_win_multiplier: u32,
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub requested_features: Vec<String>,
    #[serde(default)]
    pub competitor_references: Vec<String>,
    #[serde(default)]
    pub special_requirements: Option<String>,
}

fn default_markets() -> Vec<String> {
    vec!["UK".to_string(), "Malta".to_string()]
}
fn default_volatility() -> String {
    "medium".to_string()
}
fn default_rtp() -> f64 {
    96.0
}
fn default_reels() -> usize {
    5
}
fn default_rows() -> usize {
    3
}
fn default_pay_style() -> String {
    "243 ways".to_string()
}
fn default_max_win() -> u32 {
    5000
}

impl TargetRequest {
    /// A request with every optional field at its default.
    pub fn new(theme: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            target_markets: default_markets(),
            volatility: default_volatility(),
            target_rtp: default_rtp(),
            reels: default_reels(),
            rows: default_rows(),
            ways_or_lines: default_pay_style(),
            max_win_multiplier: default_max_win(),
            art_style: String::new(),
            requested_features: Vec::new(),
            competitor_references: Vec::new(),
            special_requirements: None,
        }
    }

    /// Validate into a [`TargetSpec`].
    ///
    /// Unknown feature names fail validation when `strict` is set; otherwise
    /// they are dropped from the spec and reported in the returned warnings.
    pub fn validate(&self, strict: bool) -> TargetResult<(TargetSpec, Vec<String>)> {
        let theme = self.theme.trim();
        if theme.is_empty() {
            return Err(TargetError::EmptyTheme);
        }

        let markets: Vec<String> = self
            .target_markets
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if markets.is_empty() {
            return Err(TargetError::NoMarkets);
        }

        if !(75.0..=99.0).contains(&self.target_rtp) {
            return Err(TargetError::RtpOutOfRange(self.target_rtp));
        }
        if !(3..=8).contains(&self.reels) || !(1..=10).contains(&self.rows) {
            return Err(TargetError::GridOutOfRange {
                reels: self.reels,
                rows: self.rows,
            });
        }
        if !(100..=250_000).contains(&self.max_win_multiplier) {
            return Err(TargetError::MaxWinOutOfRange(self.max_win_multiplier));
        }

        let volatility: VolatilityClass = self.volatility.parse()?;
        let pay_style: PayStyle = self.ways_or_lines.parse()?;
        if let PayStyle::Lines { count } = pay_style {
            let available = crate::math::model::count_paylines(self.reels, self.rows);
            if count > available {
                return Err(TargetError::TooManyLines {
                    lines: count,
                    available,
                });
            }
        }

        let mut features = Vec::new();
        let mut unknown = Vec::new();
        for name in &self.requested_features {
            match name.parse::<FeatureKind>() {
                Ok(f) if !features.contains(&f) => features.push(f),
                Ok(_) => {}
                Err(raw) => unknown.push(raw),
            }
        }

        let mut warnings = Vec::new();
        if !unknown.is_empty() {
            if strict {
                return Err(TargetError::UnknownFeatures(unknown));
            }
            for raw in &unknown {
                tracing::warn!(feature = %raw, "ignoring unrecognized feature");
                warnings.push(format!("unrecognized feature '{raw}' ignored"));
            }
        }

        let spec = TargetSpec {
            theme: theme.to_string(),
            target_markets: markets,
            volatility,
            target_rtp: self.target_rtp / 100.0,
            reels: self.reels,
            rows: self.rows,
            pay_style,
            max_win_multiplier: self.max_win_multiplier,
            art_style: self.art_style.trim().to_string(),
            features,
            competitor_references: self.competitor_references.clone(),
            special_requirements: self
                .special_requirements
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        };
        Ok((spec, warnings))
    }
}

/// Validated target specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub theme: String,
    pub target_markets: Vec<String>,
    pub volatility: VolatilityClass,
    /// Ratio, e.g. 0.965
    pub target_rtp: f64,
    pub reels: usize,
    pub rows: usize,
    pub pay_style: PayStyle,
    pub max_win_multiplier: u32,
    pub art_style: String,
    pub features: Vec<FeatureKind>,
    pub competitor_references: Vec<String>,
    pub special_requirements: Option<String>,
}

impl TargetSpec {
    pub fn has_feature(&self, feature: FeatureKind) -> bool {
        self.features.contains(&feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let (spec, warnings) = TargetRequest::new("Egyptian tombs").validate(true).unwrap();
        assert!((spec.target_rtp - 0.96).abs() < 1e-12);
        assert_eq!(spec.pay_style, PayStyle::Ways);
        assert_eq!(spec.volatility, VolatilityClass::Medium);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_feature_aliases_parse() {
        assert_eq!("Free Spins".parse::<FeatureKind>(), Ok(FeatureKind::FreeSpins));
        assert_eq!("hold-and-win".parse::<FeatureKind>(), Ok(FeatureKind::HoldAndSpin));
        assert_eq!("tumble".parse::<FeatureKind>(), Ok(FeatureKind::CascadingReels));
        assert!("laser reels".parse::<FeatureKind>().is_err());
    }

    #[test]
    fn test_unknown_features_warn_in_lenient_mode() {
        let mut req = TargetRequest::new("Vikings");
        req.requested_features = vec!["free spins".into(), "laser reels".into()];
        let (spec, warnings) = req.validate(false).unwrap();
        assert_eq!(spec.features, vec![FeatureKind::FreeSpins]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("laser reels"));
    }

    #[test]
    fn test_unknown_features_reject_in_strict_mode() {
        let mut req = TargetRequest::new("Vikings");
        req.requested_features = vec!["laser reels".into()];
        assert_eq!(
            req.validate(true).unwrap_err(),
            TargetError::UnknownFeatures(vec!["laser reels".into()])
        );
    }

    #[test]
    fn test_bounds_are_enforced() {
        let mut req = TargetRequest::new("Pirates");
        req.target_rtp = 99.5;
        assert!(matches!(req.validate(false), Err(TargetError::RtpOutOfRange(_))));

        let mut req = TargetRequest::new("Pirates");
        req.reels = 2;
        assert!(matches!(req.validate(false), Err(TargetError::GridOutOfRange { .. })));

        let mut req = TargetRequest::new("   ");
        req.reels = 5;
        assert_eq!(req.validate(false).unwrap_err(), TargetError::EmptyTheme);
    }

    #[test]
    fn test_pay_style_parsing() {
        assert_eq!("243 ways".parse::<PayStyle>().unwrap(), PayStyle::Ways);
        assert_eq!(
            "20 paylines".parse::<PayStyle>().unwrap(),
            PayStyle::Lines { count: 20 }
        );
        assert!("lots of lines".parse::<PayStyle>().is_err());
    }

    #[test]
    fn test_volatility_tiers_collapse() {
        assert_eq!("very_high".parse::<VolatilityClass>().unwrap(), VolatilityClass::High);
        assert_eq!("Medium Low".parse::<VolatilityClass>().unwrap(), VolatilityClass::Low);
        assert_eq!(
            VolatilityClass::Medium.classify(12.0),
            std::cmp::Ordering::Greater
        );
    }
}
