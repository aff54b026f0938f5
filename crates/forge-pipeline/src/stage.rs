//! Stage definitions and the contract every stage implements.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use forge_core::TargetSpec;
use forge_state::{Artifact, RunId};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Every stage the pipelines know about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    Design,
    MathModel,
    Art,
    Compliance,
    Assembly,
    LegalResearch,
    DefinitionAnalysis,
    GameArchitecture,
    DefenseBrief,
}

impl StageKind {
    pub const ALL: [StageKind; 10] = [
        StageKind::Research,
        StageKind::Design,
        StageKind::MathModel,
        StageKind::Art,
        StageKind::Compliance,
        StageKind::Assembly,
        StageKind::LegalResearch,
        StageKind::DefinitionAnalysis,
        StageKind::GameArchitecture,
        StageKind::DefenseBrief,
    ];

    /// Name used as the artifact key.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::Design => "design",
            StageKind::MathModel => "math_model",
            StageKind::Art => "art",
            StageKind::Compliance => "compliance",
            StageKind::Assembly => "assembly",
            StageKind::LegalResearch => "legal_research",
            StageKind::DefinitionAnalysis => "definition_analysis",
            StageKind::GameArchitecture => "game_architecture",
            StageKind::DefenseBrief => "defense_brief",
        }
    }

    /// Artifacts this stage reads, in the standard pipelines.
    pub fn default_inputs(&self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            Research | LegalResearch => &[],
            Design => &[Research],
            MathModel => &[Design],
            Art => &[Design, MathModel],
            Compliance => &[Research, MathModel],
            Assembly => &[Research, Design, MathModel, Art, Compliance],
            DefinitionAnalysis => &[LegalResearch],
            GameArchitecture => &[LegalResearch, DefinitionAnalysis],
            DefenseBrief => &[LegalResearch, DefinitionAnalysis, GameArchitecture],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

/// Which ordered stage list a run follows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    Product,
    LegalRecon,
}

impl PipelineVariant {
    pub fn stages(&self) -> &'static [StageKind] {
        use StageKind::*;
        match self {
            PipelineVariant::Product => &[Research, Design, MathModel, Art, Compliance, Assembly],
            PipelineVariant::LegalRecon => {
                &[LegalResearch, DefinitionAnalysis, GameArchitecture, DefenseBrief]
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineVariant::Product => "product",
            PipelineVariant::LegalRecon => "legal_recon",
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Single-jurisdiction legal reconnaissance request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconRequest {
    pub jurisdiction: String,
    #[serde(default)]
    pub game_hint: Option<String>,
}

/// What a run was asked to produce. Fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum RunRequest {
    Product(TargetSpec),
    LegalRecon(ReconRequest),
}

impl RunRequest {
    pub fn variant(&self) -> PipelineVariant {
        match self {
            RunRequest::Product(_) => PipelineVariant::Product,
            RunRequest::LegalRecon(_) => PipelineVariant::LegalRecon,
        }
    }

    /// Short human label: the theme or the jurisdiction.
    pub fn label(&self) -> &str {
        match self {
            RunRequest::Product(t) => &t.theme,
            RunRequest::LegalRecon(r) => &r.jurisdiction,
        }
    }

    pub fn target(&self) -> Result<&TargetSpec, StageError> {
        match self {
            RunRequest::Product(t) => Ok(t),
            RunRequest::LegalRecon(_) => Err(StageError::Validation(
                "stage requires a product target".into(),
            )),
        }
    }

    /// Flat context handed to content providers.
    pub fn context(&self) -> serde_json::Value {
        match self {
            RunRequest::Product(t) => serde_json::json!({
                "theme": t.theme,
                "markets": t.target_markets,
                "volatility": t.volatility.as_str(),
                "target_rtp": t.target_rtp,
                "reels": t.reels,
                "rows": t.rows,
                "pay_style": t.pay_style.to_string(),
                "max_win": t.max_win_multiplier,
                "art_style": t.art_style,
                "features": t.features.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                "competitors": t.competitor_references,
                "special_requirements": t.special_requirements,
            }),
            RunRequest::LegalRecon(r) => serde_json::json!({
                "jurisdiction": r.jurisdiction,
                "game_hint": r.game_hint,
            }),
        }
    }
}

/// Everything a stage invocation may read.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub run_id: RunId,
    pub request: RunRequest,
    /// Latest artifact per declared input kind that exists
    pub artifacts: BTreeMap<StageKind, Artifact>,
    /// Accumulated reviewer feedback, present only on a re-run after rejection
    pub feedback: Option<String>,
    /// 1-based attempt number within the current retry loop
    pub attempt: u32,
}

impl StageInput {
    pub fn artifact(&self, kind: StageKind) -> Option<&Artifact> {
        self.artifacts.get(&kind)
    }

    /// Payload of a required input.
    pub fn payload(&self, stage: StageKind, kind: StageKind) -> Result<&serde_json::Value, StageError> {
        self.artifact(kind)
            .map(|a| &a.payload)
            .ok_or(StageError::MissingInput { stage, input: kind })
    }

    pub fn is_degraded(&self, kind: StageKind) -> bool {
        self.artifact(kind).is_some_and(|a| a.degraded)
    }
}

/// A stage's result before it is sealed into an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub payload: serde_json::Value,
    /// Output is usable but did not meet its own targets
    pub degraded: bool,
    /// Surfaced in the run report
    pub warnings: Vec<String>,
}

impl StageOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            degraded: false,
            warnings: Vec::new(),
        }
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// A unit of pipeline work with declared input and output contracts.
///
/// Stages must be safe to re-invoke: the orchestrator retries transient
/// failures and re-runs stages after a rejected review.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The kind this stage produces.
    fn kind(&self) -> StageKind;

    /// Kinds read before invocation.
    fn inputs(&self) -> Vec<StageKind> {
        self.kind().default_inputs().to_vec()
    }

    /// Whether the stage can run without `input` by falling back to
    /// built-in data.
    fn has_fallback(&self, _input: StageKind) -> bool {
        false
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.name().parse::<StageKind>().unwrap(), kind);
        }
        assert_eq!("math-model".parse::<StageKind>().unwrap(), StageKind::MathModel);
        assert!("render".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_inputs_precede_their_stage() {
        for variant in [PipelineVariant::Product, PipelineVariant::LegalRecon] {
            let order = variant.stages();
            for (i, stage) in order.iter().enumerate() {
                for input in stage.default_inputs() {
                    let pos = order.iter().position(|k| k == input).unwrap();
                    assert!(pos < i, "{input} must run before {stage}");
                }
            }
        }
    }

    #[test]
    fn test_variant_lengths() {
        assert_eq!(PipelineVariant::Product.stages().len(), 6);
        assert_eq!(PipelineVariant::LegalRecon.stages().len(), 4);
    }
}
