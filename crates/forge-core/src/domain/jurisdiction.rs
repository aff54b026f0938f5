//! Built-in regulator dataset.
//!
//! Used when the knowledge store has no research for a market, and by the
//! compliance checks. Covers the international markets only.

use serde::Serialize;

use super::target::FeatureKind;

/// Static rules for one regulated market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JurisdictionRules {
    pub market: &'static str,
    pub regulator: &'static str,
    /// Minimum RTP as a ratio
    pub min_rtp: f64,
    pub max_win_cap: Option<u32>,
    pub certifiers: &'static [&'static str],
    pub content_restrictions: &'static [&'static str],
    pub banned_features: &'static [FeatureKind],
    pub data_privacy: &'static str,
}

static JURISDICTIONS: &[JurisdictionRules] = &[
    JurisdictionRules {
        market: "UK",
        regulator: "UKGC",
        min_rtp: 0.80,
        max_win_cap: None,
        certifiers: &["GLI", "BMM", "eCOGRA", "NMi"],
        content_restrictions: &[
            "No content appealing primarily to children",
            "Responsible gambling messaging required",
            "Reality check at 60-minute intervals",
            "Session time and loss limits mandatory",
        ],
        banned_features: &[FeatureKind::BonusBuy],
        data_privacy: "GDPR",
    },
    JurisdictionRules {
        market: "Malta",
        regulator: "MGA",
        min_rtp: 0.85,
        max_win_cap: None,
        certifiers: &["GLI", "BMM", "iTech Labs"],
        content_restrictions: &[
            "No offensive or discriminatory content",
            "RNG certification required",
        ],
        banned_features: &[],
        data_privacy: "GDPR",
    },
    JurisdictionRules {
        market: "Ontario",
        regulator: "AGCO/iGO",
        min_rtp: 0.85,
        max_win_cap: None,
        certifiers: &["GLI", "BMM", "iTech Labs", "Gaming Associates"],
        content_restrictions: &[
            "Responsible gambling tools mandatory",
            "Self-exclusion integration required",
            "No inducements to problem gambling",
        ],
        banned_features: &[],
        data_privacy: "PIPEDA",
    },
    JurisdictionRules {
        market: "New Jersey",
        regulator: "NJ DGE",
        min_rtp: 0.83,
        max_win_cap: None,
        certifiers: &["GLI", "BMM"],
        content_restrictions: &[
            "Geolocation verification required",
            "Age verification mandatory",
            "Responsible gambling features required",
        ],
        banned_features: &[],
        data_privacy: "State privacy laws",
    },
    JurisdictionRules {
        market: "Curacao",
        regulator: "Curacao eGaming",
        min_rtp: 0.75,
        max_win_cap: None,
        certifiers: &["GLI", "iTech Labs"],
        content_restrictions: &["Basic responsible gambling messaging"],
        banned_features: &[],
        data_privacy: "Minimal requirements",
    },
];

/// Every built-in market.
pub fn all() -> &'static [JurisdictionRules] {
    JURISDICTIONS
}

/// Look up a market by name or common alias (case-insensitive).
pub fn lookup(market: &str) -> Option<&'static JurisdictionRules> {
    let key = market.trim().to_ascii_lowercase();
    let canonical = match key.as_str() {
        "uk" | "gb" | "great britain" | "united kingdom" => "uk",
        "mt" | "malta" => "malta",
        "on" | "ontario" => "ontario",
        "nj" | "new jersey" | "new_jersey" => "new jersey",
        "cw" | "curacao" | "curaçao" => "curacao",
        other => other,
    };
    JURISDICTIONS
        .iter()
        .find(|j| j.market.to_ascii_lowercase() == canonical)
}

/// The strictest (highest) minimum RTP across `markets` with known rules.
pub fn binding_min_rtp<'a>(markets: impl IntoIterator<Item = &'a str>) -> Option<(&'static str, f64)> {
    markets
        .into_iter()
        .filter_map(lookup)
        .map(|j| (j.market, j.min_rtp))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
