//! Filesystem-backed artifact store and run repository.
//!
//! Layout:
//! ```text
//! <root>/runs/<run_id>.json                 one RunRecord, replaced atomically
//! <root>/artifacts/<run_id>/<seq>.json      one Artifact per file, never replaced
//! <root>/knowledge.json                     all knowledge entries, replaced atomically
//! ```
//!
//! Every write goes to a temp file in the destination directory and is then
//! persisted, so readers never observe a half-written record.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Durable JSON-file store for artifacts and run snapshots.
pub struct FsStore {
    root: PathBuf,
    // Serialises sequence assignment within this process.
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("runs"))?;
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        Ok(self
            .root
            .join("runs")
            .join(format!("{}.json", checked_name(run_id)?)))
    }

    fn artifact_dir(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        Ok(self.root.join("artifacts").join(checked_name(run_id)?))
    }

    fn read_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<Artifact>> {
        let dir = self.artifact_dir(run_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let artifact: Artifact = serde_json::from_slice(&bytes)?;
            if !artifact.verify() {
                return Err(StorageError::Corrupted {
                    run_id: run_id.0.clone(),
                    seq: artifact.seq,
                });
            }
            artifacts.push(artifact);
        }
        artifacts.sort_by_key(|a| a.seq);
        Ok(artifacts)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeEntry {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

impl FsStore {
    fn knowledge_path(&self) -> PathBuf {
        self.root.join("knowledge.json")
    }

    fn read_knowledge(&self) -> StorageResult<BTreeMap<String, KnowledgeEntry>> {
        match fs::read(self.knowledge_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject run ids that would escape the store directory.
fn checked_name(run_id: &RunId) -> StorageResult<&str> {
    let name = run_id.0.as_str();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StorageError::RunNotFound {
            run_id: name.to_string(),
        })
    }
}

fn write_atomic(dir: &Path, bytes: &[u8]) -> StorageResult<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn put(&self, run_id: &RunId, artifact: NewArtifact) -> StorageResult<Artifact> {
        let _guard = self.write_lock.lock().await;
        let dir = self.artifact_dir(run_id)?;
        fs::create_dir_all(&dir)?;

        let seq = self
            .read_artifacts(run_id)?
            .last()
            .map(|a| a.seq + 1)
            .unwrap_or(1);
        let sealed = artifact.seal(run_id, seq);
        let bytes = serde_json::to_vec_pretty(&sealed)?;

        let tmp = write_atomic(&dir, &bytes)?;
        let path = dir.join(format!("{seq:08}.json"));
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::Conflict {
                    run_id: run_id.0.clone(),
                    seq,
                }
            } else {
                StorageError::Io(e.error)
            }
        })?;

        debug!(run_id = %run_id, stage = %sealed.stage, seq, "artifact persisted");
        Ok(sealed)
    }

    async fn get_latest(&self, run_id: &RunId, stage: &str) -> StorageResult<Artifact> {
        self.read_artifacts(run_id)?
            .into_iter()
            .rev()
            .find(|a| a.stage == stage)
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
                stage: stage.to_string(),
            })
    }

    async fn get_all(&self, run_id: &RunId) -> StorageResult<Vec<Artifact>> {
        self.read_artifacts(run_id)
    }
}

#[async_trait]
impl RunRepository for FsStore {
    async fn save(&self, record: &RunRecord) -> StorageResult<()> {
        let path = self.run_path(&record.run_id)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = write_atomic(&self.root.join("runs"), &bytes)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let path = self.run_path(run_id)?;
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("runs"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            records.push(serde_json::from_slice::<RunRecord>(&bytes)?);
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[async_trait]
impl KnowledgeStore for FsStore {
    async fn upsert(
        &self,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_knowledge()?;
        if let Some((_, other)) = entries.iter().find(|(k, _)| k.as_str() != key) {
            if other.vector.len() != vector.len() {
                return Err(StorageError::DimensionMismatch {
                    expected: other.vector.len(),
                    actual: vector.len(),
                });
            }
        }
        entries.insert(key.to_string(), KnowledgeEntry { vector, payload });

        let bytes = serde_json::to_vec_pretty(&entries)?;
        let tmp = write_atomic(&self.root, &bytes)?;
        tmp.persist(self.knowledge_path())
            .map_err(|e| StorageError::Io(e.error))?;
        debug!(key, count = entries.len(), "knowledge entry persisted");
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> StorageResult<Vec<KnowledgeMatch>> {
        let mut matches: Vec<KnowledgeMatch> = self
            .read_knowledge()?
            .into_iter()
            .filter(|(_, e)| e.vector.len() == vector.len())
            .map(|(key, e)| KnowledgeMatch {
                score: cosine_similarity(&e.vector, vector),
                payload: e.payload,
                key,
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn status(&self) -> StorageResult<KnowledgeStatus> {
        let keys: Vec<String> = self.read_knowledge()?.into_keys().collect();
        Ok(KnowledgeStatus {
            count: keys.len(),
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_store() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn sequence_survives_reopen() {
        let (dir, store) = make_store();
        let run = RunId::new();
        store
            .put(&run, NewArtifact::new("research", json!({"n": 1})))
            .await
            .unwrap();
        drop(store);

        let reopened = FsStore::open(dir.path()).unwrap();
        let second = reopened
            .put(&run, NewArtifact::new("design", json!({"n": 2})))
            .await
            .unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(reopened.get_all(&run).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tampered_artifact_is_reported() {
        let (dir, store) = make_store();
        let run = RunId::new();
        store
            .put(&run, NewArtifact::new("research", json!({"rtp": 0.96})))
            .await
            .unwrap();

        let path = dir
            .path()
            .join("artifacts")
            .join(&run.0)
            .join("00000001.json");
        let text = fs::read_to_string(&path).unwrap().replace("0.96", "0.99");
        fs::write(&path, text).unwrap();

        let err = store.get_all(&run).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { seq: 1, .. }));
    }

    #[tokio::test]
    async fn float_payloads_verify_after_reopen() {
        let (dir, store) = make_store();
        let run = RunId::new();
        let samples: Vec<f64> = (1..2000)
            .map(|i| (i as f64 * 0.7311).sin() / (i as f64).sqrt())
            .collect();
        let written = store
            .put(&run, NewArtifact::new("math_model", json!({ "samples": samples })))
            .await
            .unwrap();
        drop(store);

        let reopened = FsStore::open(dir.path()).unwrap();
        let read = reopened.get_latest(&run, "math_model").await.unwrap();
        assert_eq!(read.digest, written.digest);
        assert_eq!(read.payload, written.payload);
    }

    #[tokio::test]
    async fn knowledge_survives_reopen() {
        let (dir, store) = make_store();
        store
            .upsert("malta", vec![0.2, 0.9, 0.1], json!({"min_rtp": 0.92}))
            .await
            .unwrap();
        drop(store);

        let reopened = FsStore::open(dir.path()).unwrap();
        let hits = reopened.query(&[0.2, 0.9, 0.1], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "malta");
        assert_eq!(hits[0].payload["min_rtp"], json!(0.92));
    }

    #[tokio::test]
    async fn path_like_run_ids_are_rejected() {
        let (_dir, store) = make_store();
        let err = store.load(&RunId("../etc".into())).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
