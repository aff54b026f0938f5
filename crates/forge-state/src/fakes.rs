//! In-memory implementations of the storage traits
//!
//! Provides `MemoryArtifactStore`, `MemoryRunRepository`, and
//! `MemoryKnowledgeStore`. They satisfy the trait contracts without any
//! external dependencies and back the test suites and single-process runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact store backed by a `HashMap<run_id, Vec<Artifact>>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    runs: Mutex<HashMap<String, Vec<Artifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, run_id: &RunId, artifact: NewArtifact) -> StorageResult<Artifact> {
        let mut runs = self.runs.lock().unwrap();
        let entries = runs.entry(run_id.0.clone()).or_default();
        let seq = entries.last().map(|a| a.seq + 1).unwrap_or(1);
        let sealed = artifact.seal(run_id, seq);
        entries.push(sealed.clone());
        Ok(sealed)
    }

    async fn get_latest(&self, run_id: &RunId, stage: &str) -> StorageResult<Artifact> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .and_then(|entries| entries.iter().rev().find(|a| a.stage == stage))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
                stage: stage.to_string(),
            })
    }

    async fn get_all(&self, run_id: &RunId) -> StorageResult<Vec<Artifact>> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(&run_id.0).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryRunRepository
// ---------------------------------------------------------------------------

/// In-memory run repository backed by a `BTreeMap<run_id, RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunRepository {
    runs: Mutex<BTreeMap<String, RunRecord>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn save(&self, record: &RunRecord) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        runs.insert(record.run_id.0.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn list(&self) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut all: Vec<RunRecord> = runs.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// MemoryKnowledgeStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct KnowledgeEntry {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

/// In-memory knowledge store with brute-force cosine ranking.
///
/// The first upsert fixes the vector dimension.
#[derive(Debug, Default)]
pub struct MemoryKnowledgeStore {
    entries: Mutex<BTreeMap<String, KnowledgeEntry>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn upsert(
        &self,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.values().next() {
            if existing.vector.len() != vector.len() {
                return Err(StorageError::DimensionMismatch {
                    expected: existing.vector.len(),
                    actual: vector.len(),
                });
            }
        }
        entries.insert(key.to_string(), KnowledgeEntry { vector, payload });
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> StorageResult<Vec<KnowledgeMatch>> {
        let entries = self.entries.lock().unwrap();
        let mut matches: Vec<KnowledgeMatch> = entries
            .iter()
            .filter(|(_, e)| e.vector.len() == vector.len())
            .map(|(key, e)| KnowledgeMatch {
                key: key.clone(),
                score: cosine_similarity(&e.vector, vector),
                payload: e.payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn status(&self) -> StorageResult<KnowledgeStatus> {
        let entries = self.entries.lock().unwrap();
        Ok(KnowledgeStatus {
            count: entries.len(),
            keys: entries.keys().cloned().collect(),
        })
    }
}
