//! Art: art direction plus one generated asset per symbol.

use async_trait::async_trait;
use forge_core::math::SymbolTier;
use futures::future::try_join_all;
use forge_core::{AssetKind, AssetSpec, ContentRequest};
use serde_json::{json, Value};

use super::content::validate_sections;
use super::{MathArtifact, Providers};
use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

pub struct ArtStage {
    providers: Providers,
}

impl ArtStage {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }
}

fn tier_name(tier: SymbolTier) -> &'static str {
    match tier {
        SymbolTier::High => "high-pay",
        SymbolTier::Low => "low-pay",
        SymbolTier::Wild => "wild",
        SymbolTier::Scatter => "scatter",
    }
}

#[async_trait]
impl Stage for ArtStage {
    fn kind(&self) -> StageKind {
        StageKind::Art
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let target = input.request.target()?;
        input.payload(StageKind::Art, StageKind::Design)?;
        let math: MathArtifact =
            serde_json::from_value(input.payload(StageKind::Art, StageKind::MathModel)?.clone())?;

        let symbols: Vec<&str> = math.model.symbols.iter().map(|s| s.id.as_str()).collect();
        let mut context = input.request.context();
        if let Value::Object(ctx) = &mut context {
            ctx.insert("symbols".into(), json!(symbols));
        }
        let request = ContentRequest::new("art_direction", context)
            .with_feedback(input.feedback.clone());
        let direction = self.providers.content.generate(&request).await?;
        validate_sections(StageKind::Art, &direction)?;

        let style = if target.art_style.is_empty() {
            "house style".to_string()
        } else {
            target.art_style.clone()
        };
        let notes = input
            .feedback
            .as_deref()
            .map(|f| format!(" Reviewer notes: {f}"))
            .unwrap_or_default();

        let mut specs: Vec<AssetSpec> = math
            .model
            .symbols
            .iter()
            .map(|s| AssetSpec {
                name: s.id.clone(),
                kind: AssetKind::Image,
                prompt: format!("{} {} symbol for a {} slot.{notes}", s.id, tier_name(s.tier), target.theme),
                style: style.clone(),
            })
            .collect();
        specs.push(AssetSpec {
            name: "background".into(),
            kind: AssetKind::Image,
            prompt: format!("Reel background for a {} slot.{notes}", target.theme),
            style: style.clone(),
        });
        specs.push(AssetSpec {
            name: "theme".into(),
            kind: AssetKind::Audio,
            prompt: format!("Looping base-game soundtrack for a {} slot.", target.theme),
            style,
        });

        // order follows `specs`; the first failure aborts the batch
        let assets =
            try_join_all(specs.iter().map(|spec| self.providers.assets.generate(spec))).await?;

        Ok(StageOutput::new(json!({
            "direction": direction,
            "assets": assets,
            "feedback": input.feedback,
        })))
    }
}
