//! Providers that run without network access.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{
    AssetProvider, AssetRef, AssetSpec, ContentProvider, ContentRequest, Document, Embedder,
    ProviderError, ProviderResult, ResearchProvider,
};
use crate::domain::jurisdiction;

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
}

/// Feature hashing into a fixed number of buckets, L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let h = Sha256::digest(token.as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&h[..8]);
            let bucket = (u64::from_le_bytes(idx) % self.dimension as u64) as usize;
            let sign = if h[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

/// Keyword search over a fixed corpus, seeded from the regulator table.
#[derive(Debug, Clone)]
pub struct StaticResearch {
    corpus: Vec<Document>,
}

impl StaticResearch {
    pub fn with_documents(corpus: Vec<Document>) -> Self {
        Self { corpus }
    }

    fn regulator_corpus() -> Vec<Document> {
        jurisdiction::all()
            .iter()
            .map(|j| Document {
                title: format!("{} online slot regulation", j.market),
                source: format!("builtin:{}", j.regulator),
                snippet: format!(
                    "{} regulates online slots in {}. Minimum RTP {:.1}%. Certifiers: {}. {}",
                    j.regulator,
                    j.market,
                    j.min_rtp * 100.0,
                    j.certifiers.join(", "),
                    j.content_restrictions.join(". "),
                ),
                score: 0.0,
            })
            .collect()
    }
}

impl Default for StaticResearch {
    fn default() -> Self {
        Self::with_documents(Self::regulator_corpus())
    }
}

#[async_trait]
impl ResearchProvider for StaticResearch {
    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<Document>> {
        let wanted: BTreeSet<String> = tokens(query).collect();
        if wanted.is_empty() {
            return Err(ProviderError::Invalid("empty query".into()));
        }

        let mut hits: Vec<Document> = self
            .corpus
            .iter()
            .filter_map(|doc| {
                let have: BTreeSet<String> =
                    tokens(&doc.title).chain(tokens(&doc.snippet)).collect();
                let matched = wanted.intersection(&have).count();
                (matched > 0).then(|| Document {
                    score: matched as f32 / wanted.len() as f32,
                    ..doc.clone()
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Fills fixed section templates from the request context.
#[derive(Debug, Clone, Default)]
pub struct TemplateContent;

fn ctx_str<'a>(ctx: &'a Value, key: &str) -> &'a str {
    ctx.get(key).and_then(Value::as_str).unwrap_or("unspecified")
}

fn ctx_list(ctx: &Value, key: &str) -> String {
    match ctx.get(key).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        _ => "none".to_string(),
    }
}

impl TemplateContent {
    fn sections(task: &str, ctx: &Value) -> ProviderResult<Vec<(&'static str, String)>> {
        let theme = ctx_str(ctx, "theme");
        let sections = match task {
            "game_design" => vec![
                ("Concept", format!("A {} slot themed around {}.", ctx_str(ctx, "volatility"), theme)),
                ("Grid", format!("{} reels by {} rows, {}.", ctx["reels"], ctx["rows"], ctx_str(ctx, "pay_style"))),
                ("Features", format!("Feature set: {}.", ctx_list(ctx, "features"))),
                ("Player Experience", format!("Anticipation builds on reels 3 to 5; {} imagery throughout.", theme)),
            ],
            "art_direction" => vec![
                ("Style", format!("{} rendering of {}.", ctx_str(ctx, "art_style"), theme)),
                ("Palette", "High-contrast primaries for high pays, muted tones for low pays.".to_string()),
                ("Symbols", format!("Symbol set: {}.", ctx_list(ctx, "symbols"))),
            ],
            "legal_definitions" => vec![
                ("Statutory Terms", format!("Definitions of gambling, game of chance and prize under {}.", ctx_str(ctx, "jurisdiction"))),
                ("Element Analysis", "Consideration, chance and prize analysed separately.".to_string()),
            ],
            "game_architecture" => vec![
                ("Mechanic", format!("Sweepstakes-style mechanic for {}.", ctx_str(ctx, "jurisdiction"))),
                ("Element Removal", "Consideration removed through a free alternative method of entry.".to_string()),
            ],
            "defense_brief" => vec![
                ("Summary", format!("Position paper for operating in {}.", ctx_str(ctx, "jurisdiction"))),
                ("Risk", "Residual enforcement risk rated moderate pending counsel review.".to_string()),
            ],
            other => return Err(ProviderError::Invalid(format!("unknown content task '{other}'"))),
        };
        Ok(sections)
    }
}

#[async_trait]
impl ContentProvider for TemplateContent {
    async fn generate(&self, request: &ContentRequest) -> ProviderResult<Value> {
        let mut sections: Vec<Value> = Self::sections(&request.task, &request.context)?
            .into_iter()
            .map(|(heading, body)| json!({ "heading": heading, "body": body }))
            .collect();
        if let Some(feedback) = &request.feedback {
            sections.push(json!({ "heading": "Revisions", "body": feedback }));
        }
        Ok(json!({
            "task": request.task,
            "sections": sections,
            "revision_of_feedback": request.feedback,
        }))
    }
}

/// Returns deterministic `placeholder://` references instead of rendering.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderAssets;

#[async_trait]
impl AssetProvider for PlaceholderAssets {
    async fn generate(&self, spec: &AssetSpec) -> ProviderResult<AssetRef> {
        if spec.name.trim().is_empty() {
            return Err(ProviderError::Invalid("asset name is empty".into()));
        }
        let digest = hex_prefix(&Sha256::digest(format!("{}|{}", spec.prompt, spec.style)));
        let kind = match spec.kind {
            super::AssetKind::Image => "image",
            super::AssetKind::Audio => "audio",
        };
        Ok(AssetRef {
            name: spec.name.clone(),
            kind: spec.kind,
            uri: format!("placeholder://{kind}/{}-{digest}", spec.name.to_lowercase()),
        })
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..6].iter().map(|b| format!("{b:02x}")).collect()
}
