//! Compliance: check the measured math and requested features against each
//! target market's rules.

use async_trait::async_trait;
use forge_core::{jurisdiction, FeatureKind, JurisdictionRules, TargetSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MathArtifact;
use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

/// The subset of a market's rules the checks need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRules {
    pub market: String,
    pub regulator: String,
    pub min_rtp: f64,
    #[serde(default)]
    pub max_win_cap: Option<u32>,
    #[serde(default)]
    pub banned_features: Vec<FeatureKind>,
}

impl From<&JurisdictionRules> for MarketRules {
    fn from(j: &JurisdictionRules) -> Self {
        Self {
            market: j.market.to_string(),
            regulator: j.regulator.to_string(),
            min_rtp: j.min_rtp,
            max_win_cap: j.max_win_cap,
            banned_features: j.banned_features.to_vec(),
        }
    }
}

/// Ordered worst-last so the overall verdict is the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Unverified,
    Marginal,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketFinding {
    pub market: String,
    pub regulator: Option<String>,
    pub verdict: Verdict,
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub overall: Verdict,
    pub markets: Vec<MarketFinding>,
    pub warnings: Vec<String>,
}

/// Check one market. `None` rules yield `Unverified`.
fn check_market(
    market: &str,
    rules: Option<&MarketRules>,
    target: &TargetSpec,
    math: &MathArtifact,
) -> MarketFinding {
    let Some(rules) = rules else {
        return MarketFinding {
            market: market.to_string(),
            regulator: None,
            verdict: Verdict::Unverified,
            findings: vec!["no rules available for this market".into()],
        };
    };

    let mut verdict = Verdict::Pass;
    let mut findings = Vec::new();
    let stats = &math.stats;

    if stats.rtp_ci_99.low >= rules.min_rtp {
        findings.push(format!(
            "RTP {:.4} meets minimum {:.4} across the 99% interval",
            stats.rtp, rules.min_rtp
        ));
    } else if stats.rtp >= rules.min_rtp {
        verdict = verdict.max(Verdict::Marginal);
        findings.push(format!(
            "RTP {:.4} meets minimum {:.4} but the 99% interval reaches {:.4}",
            stats.rtp, rules.min_rtp, stats.rtp_ci_99.low
        ));
    } else {
        verdict = Verdict::Fail;
        findings.push(format!(
            "RTP {:.4} below minimum {:.4}",
            stats.rtp, rules.min_rtp
        ));
    }

    for feature in target.features.iter().filter(|f| rules.banned_features.contains(f)) {
        verdict = Verdict::Fail;
        findings.push(format!("feature {feature} is banned by {}", rules.regulator));
    }

    if let Some(cap) = rules.max_win_cap {
        if target.max_win_multiplier > cap || math.model.max_win > f64::from(cap) {
            verdict = Verdict::Fail;
            findings.push(format!(
                "max win {}x exceeds the {cap}x cap",
                target.max_win_multiplier
            ));
        }
    }

    MarketFinding {
        market: market.to_string(),
        regulator: Some(rules.regulator.clone()),
        verdict,
        findings,
    }
}

/// Evaluate every target market. Research rules win over built-in ones.
pub fn evaluate(
    target: &TargetSpec,
    research: Option<&Value>,
    math: &MathArtifact,
    math_degraded: bool,
) -> ComplianceReport {
    let mut warnings = Vec::new();
    if math_degraded || !math.converged {
        warnings.push(format!(
            "math model did not converge; RTP figures are from the best iteration (residual {:+.5})",
            math.residual
        ));
    }
    if research.is_none() {
        warnings.push("no research artifact; checked against built-in jurisdiction data".into());
    }

    let markets: Vec<MarketFinding> = target
        .target_markets
        .iter()
        .map(|market| {
            let researched = research
                .and_then(|r| r.get("markets"))
                .and_then(Value::as_array)
                .and_then(|ms| ms.iter().find(|m| m["market"] == market.as_str()))
                .and_then(|m| serde_json::from_value::<MarketRules>(m["rules"].clone()).ok());
            let rules = researched.or_else(|| jurisdiction::lookup(market).map(MarketRules::from));
            check_market(market, rules.as_ref(), target, math)
        })
        .collect();

    for m in markets.iter().filter(|m| m.verdict >= Verdict::Marginal) {
        warnings.push(format!("compliance {:?} for {}", m.verdict, m.market).to_lowercase());
    }
    let overall = markets
        .iter()
        .map(|m| m.verdict)
        .max()
        .unwrap_or(Verdict::Unverified);

    ComplianceReport {
        overall,
        markets,
        warnings,
    }
}

pub struct ComplianceStage;

#[async_trait]
impl Stage for ComplianceStage {
    fn kind(&self) -> StageKind {
        StageKind::Compliance
    }

    fn has_fallback(&self, input: StageKind) -> bool {
        input == StageKind::Research
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let target = input.request.target()?;
        let math: MathArtifact = serde_json::from_value(
            input
                .payload(StageKind::Compliance, StageKind::MathModel)?
                .clone(),
        )?;
        let research = input.artifact(StageKind::Research).map(|a| &a.payload);
        let report = evaluate(target, research, &math, input.is_degraded(StageKind::MathModel));
        let warnings = report.warnings.clone();
        Ok(StageOutput::new(serde_json::to_value(&report)?).with_warnings(warnings))
    }
}
