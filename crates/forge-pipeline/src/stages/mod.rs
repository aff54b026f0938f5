//! The built-in stage implementations for both pipeline variants.

pub mod art;
pub mod assembly;
pub mod compliance;
pub mod content;
pub mod math_model;
pub mod research;

use std::sync::Arc;

use forge_core::{
    AssetProvider, ContentProvider, Embedder, HashingEmbedder, PipelineConfig, PlaceholderAssets,
    ResearchProvider, StaticResearch, TemplateContent,
};
use forge_state::KnowledgeStore;

use crate::stage::{Stage, StageKind};

pub use art::ArtStage;
pub use assembly::AssemblyStage;
pub use compliance::{ComplianceReport, ComplianceStage, MarketFinding, MarketRules, Verdict};
pub use content::ContentStage;
pub use math_model::{MathArtifact, MathModelStage};
pub use research::{LegalResearchStage, ResearchStage};

/// External collaborators shared by the stages.
#[derive(Clone)]
pub struct Providers {
    pub research: Arc<dyn ResearchProvider>,
    pub content: Arc<dyn ContentProvider>,
    pub assets: Arc<dyn AssetProvider>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn Embedder>,
}

impl Providers {
    /// Offline providers around the given knowledge store.
    pub fn offline(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            research: Arc::new(StaticResearch::default()),
            content: Arc::new(TemplateContent),
            assets: Arc::new(PlaceholderAssets),
            knowledge,
            embedder: Arc::new(HashingEmbedder::default()),
        }
    }
}

/// One stage per [`StageKind`], wired to `providers`.
pub fn standard_stages(providers: &Providers, config: &PipelineConfig) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ResearchStage::new(providers.clone())),
        Arc::new(ContentStage::new(
            StageKind::Design,
            "game_design",
            providers.content.clone(),
        )),
        Arc::new(MathModelStage::new(config.clone())),
        Arc::new(ArtStage::new(providers.clone())),
        Arc::new(ComplianceStage),
        Arc::new(AssemblyStage),
        Arc::new(LegalResearchStage::new(providers.clone())),
        Arc::new(ContentStage::new(
            StageKind::DefinitionAnalysis,
            "legal_definitions",
            providers.content.clone(),
        )),
        Arc::new(ContentStage::new(
            StageKind::GameArchitecture,
            "game_architecture",
            providers.content.clone(),
        )),
        Arc::new(ContentStage::new(
            StageKind::DefenseBrief,
            "defense_brief",
            providers.content.clone(),
        )),
    ]
}
