//! Assembly: bind every prior artifact into one package manifest.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ComplianceReport, MathArtifact};
use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

pub struct AssemblyStage;

#[async_trait]
impl Stage for AssemblyStage {
    fn kind(&self) -> StageKind {
        StageKind::Assembly
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let target = input.request.target()?;
        for kind in self.inputs() {
            input.payload(StageKind::Assembly, kind)?;
        }
        let math: MathArtifact = serde_json::from_value(
            input.payload(StageKind::Assembly, StageKind::MathModel)?.clone(),
        )?;
        let compliance: ComplianceReport = serde_json::from_value(
            input.payload(StageKind::Assembly, StageKind::Compliance)?.clone(),
        )?;
        let asset_count = input
            .payload(StageKind::Assembly, StageKind::Art)?
            .get("assets")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        let manifest: Vec<Value> = input
            .artifacts
            .values()
            .map(|a| {
                json!({
                    "stage": a.stage,
                    "seq": a.seq,
                    "digest": a.digest,
                    "degraded": a.degraded,
                })
            })
            .collect();
        let degraded = input.artifacts.values().any(|a| a.degraded);

        let mut warnings = Vec::new();
        if degraded {
            warnings.push("package includes degraded stage output".to_string());
        }

        let stats = &math.stats;
        let payload = json!({
            "title": target.theme,
            "target": input.request.context(),
            "summary": {
                "rtp": stats.rtp,
                "rtp_ci_99": stats.rtp_ci_99,
                "base_rtp": stats.base_rtp,
                "feature_rtp": stats.feature_rtp(),
                "volatility_index": stats.std_dev,
                "hit_frequency": stats.hit_frequency,
                "max_win": stats.max_win,
                "converged": math.converged,
                "compliance": compliance.overall,
                "assets": asset_count,
            },
            "manifest": manifest,
        });
        Ok(StageOutput::new(payload)
            .degraded(degraded)
            .with_warnings(warnings))
    }
}
