//! Storage trait definitions for SlotForge
//!
//! These traits define the persistence seams of the pipeline:
//! - `ArtifactStore`: append-only stage outputs, scoped per run
//! - `RunRepository`: durable run snapshots for suspend/resume across restarts
//! - `KnowledgeStore`: vector-keyed reference data (jurisdiction research)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn of_json(value: &serde_json::Value) -> Self {
        // serde_json::Value maps are ordered, so the encoding is canonical
        Self::from_bytes(value.to_string().as_bytes())
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore: append-only stage outputs
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Immutable output of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Owning run
    pub run_id: RunId,
    /// Producing stage (e.g. "research", "math_model")
    pub stage: String,
    /// Monotonic sequence index within the run, starting at 1
    pub seq: u64,
    /// Stage-specific payload
    pub payload: serde_json::Value,
    /// SHA-256 of the canonical payload encoding
    pub digest: ContentDigest,
    /// Best-effort output (e.g. math model that missed its tolerance)
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Recompute the payload digest and compare it to the recorded one.
    pub fn verify(&self) -> bool {
        ContentDigest::of_json(&self.payload) == self.digest
    }
}

/// An artifact before the store has assigned its sequence index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub stage: String,
    pub payload: serde_json::Value,
    pub degraded: bool,
}

impl NewArtifact {
    pub fn new(stage: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            stage: stage.into(),
            payload,
            degraded: false,
        }
    }

    /// Mark the artifact as a best-effort result.
    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    /// Seal into an [`Artifact`] with the given sequence index.
    pub fn seal(self, run_id: &RunId, seq: u64) -> Artifact {
        let digest = ContentDigest::of_json(&self.payload);
        Artifact {
            run_id: run_id.clone(),
            stage: self.stage,
            seq,
            payload: self.payload,
            digest,
            degraded: self.degraded,
            created_at: Utc::now(),
        }
    }
}

/// Append-only, per-run artifact storage.
///
/// Guarantees:
/// - `put` assigns the next sequence index for the run and never overwrites.
/// - `get_latest` returns the highest-sequence artifact for the stage.
/// - A failed `put` leaves no partial artifact behind.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Append an artifact to the run.
    async fn put(&self, run_id: &RunId, artifact: NewArtifact) -> StorageResult<Artifact>;

    /// Latest artifact for the stage. Returns `StorageError::NotFound` if none.
    async fn get_latest(&self, run_id: &RunId, stage: &str) -> StorageResult<Artifact>;

    /// All artifacts of the run ordered by sequence index.
    async fn get_all(&self, run_id: &RunId) -> StorageResult<Vec<Artifact>>;
}

// ---------------------------------------------------------------------------
// RunRepository: durable run snapshots
// ---------------------------------------------------------------------------

/// Complete persisted snapshot of one run.
///
/// `snapshot` is the orchestrator's own serialized state; the repository only
/// indexes `status` for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// Short status label (e.g. "running", "suspended", "completed")
    pub status: String,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable run snapshots keyed by run id.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or replace the run's snapshot atomically.
    async fn save(&self, record: &RunRecord) -> StorageResult<()>;

    /// Load a snapshot. Returns `StorageError::RunNotFound` if absent.
    async fn load(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// All known runs, oldest first.
    async fn list(&self) -> StorageResult<Vec<RunRecord>>;
}

// ---------------------------------------------------------------------------
// KnowledgeStore: vector-keyed reference data
// ---------------------------------------------------------------------------

/// One ranked result of a knowledge query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMatch {
    pub key: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Summary of a knowledge store's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStatus {
    pub count: usize,
    pub keys: Vec<String>,
}

/// Vector knowledge store.
///
/// An empty query result is the normal "no prior data" case, not an error.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace the entry under `key`.
    async fn upsert(
        &self,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> StorageResult<()>;

    /// Best matches by cosine similarity, highest first.
    async fn query(&self, vector: &[f32], limit: usize) -> StorageResult<Vec<KnowledgeMatch>>;

    async fn status(&self) -> StorageResult<KnowledgeStatus>;
}

/// Cosine similarity of two equal-length vectors; 0.0 if either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_stable_for_equal_payloads() {
        let a = ContentDigest::of_json(&json!({"rtp": 0.965, "reels": 5}));
        let b = ContentDigest::of_json(&json!({"reels": 5, "rtp": 0.965}));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn digest_rejects_bad_hex() {
        assert!(ContentDigest::try_from("xyz".to_string()).is_err());
    }

    #[test]
    fn sealed_artifact_verifies() {
        let run = RunId::new();
        let art = NewArtifact::new("design", json!({"theme": "pharaoh"})).seal(&run, 3);
        assert_eq!(art.seq, 3);
        assert!(art.verify());
        assert!(!art.degraded);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
    }
}
