//! External collaborator interfaces.
//!
//! Stages talk to research, content and asset generation only through
//! these traits. The [`offline`] implementations need no network and are
//! what the CLI wires up by default.

pub mod offline;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use offline::{HashingEmbedder, PlaceholderAssets, StaticResearch, TemplateContent};

/// Errors returned by providers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Timeouts, rate limits, unavailability. Worth retrying.
    #[error("provider unavailable: {0}")]
    Transient(String),

    #[error("provider rejected request: {0}")]
    Invalid(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub source: String,
    pub snippet: String,
    pub score: f32,
}

#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Documents for `query`, best first, at most `limit`.
    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<Document>>;
}

/// A structured generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRequest {
    /// Template selector, e.g. `game_design`
    pub task: String,
    pub context: serde_json::Value,
    /// Reviewer feedback from a rejected previous attempt
    pub feedback: Option<String>,
}

impl ContentRequest {
    pub fn new(task: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            task: task.into(),
            context,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Structured content as a JSON object with a `sections` array.
    async fn generate(&self, request: &ContentRequest) -> ProviderResult<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub name: String,
    pub kind: AssetKind,
    pub prompt: String,
    pub style: String,
}

/// Where a generated asset lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub name: String,
    pub kind: AssetKind,
    pub uri: String,
}

#[async_trait]
pub trait AssetProvider: Send + Sync {
    async fn generate(&self, spec: &AssetSpec) -> ProviderResult<AssetRef>;
}

/// Text to vector, for the knowledge store.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}
