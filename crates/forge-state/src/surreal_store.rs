//! SurrealDB-backed implementation of all three storage traits.
//!
//! Payloads and timestamps are stored as strings so the rows round-trip
//! through SurrealDB's value model without loss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactRow {
    run_id: String,
    stage: String,
    seq: u64,
    payload_json: String,
    digest: String,
    degraded: bool,
    created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunRow {
    run_id: String,
    status: String,
    snapshot_json: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeRow {
    key: String,
    vector: Vec<f32>,
    payload_json: String,
}

#[derive(Debug, Deserialize)]
struct SeqRow {
    seq: u64,
}

fn parse_ts(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Backend(format!("bad timestamp '{s}': {e}")))
}

impl ArtifactRow {
    fn from_artifact(a: &Artifact) -> StorageResult<Self> {
        Ok(Self {
            run_id: a.run_id.0.clone(),
            stage: a.stage.clone(),
            seq: a.seq,
            payload_json: serde_json::to_string(&a.payload)?,
            digest: a.digest.as_str().to_string(),
            degraded: a.degraded,
            created_at: a.created_at.to_rfc3339(),
        })
    }

    fn into_artifact(self) -> StorageResult<Artifact> {
        let artifact = Artifact {
            run_id: RunId(self.run_id),
            stage: self.stage,
            seq: self.seq,
            payload: serde_json::from_str(&self.payload_json)?,
            digest: ContentDigest::try_from(self.digest)?,
            degraded: self.degraded,
            created_at: parse_ts(&self.created_at)?,
        };
        if !artifact.verify() {
            return Err(StorageError::Corrupted {
                run_id: artifact.run_id.0,
                seq: artifact.seq,
            });
        }
        Ok(artifact)
    }
}

impl RunRow {
    fn from_record(r: &RunRecord) -> StorageResult<Self> {
        Ok(Self {
            run_id: r.run_id.0.clone(),
            status: r.status.clone(),
            snapshot_json: serde_json::to_string(&r.snapshot)?,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        })
    }

    fn into_record(self) -> StorageResult<RunRecord> {
        Ok(RunRecord {
            run_id: RunId(self.run_id),
            status: self.status,
            snapshot: serde_json::from_str(&self.snapshot_json)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// SurrealDB store for artifacts, run snapshots and knowledge entries.
pub struct SurrealStore {
    db: Surreal<Any>,
    // Serialises sequence assignment; the unique index catches other writers.
    seq_lock: Mutex<()>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Open a local SurrealKV database under `path`.
    pub async fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Connect to any supported endpoint (`mem://`, `surrealkv://`, `ws://`).
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns("slotforge").use_db("main").await?;
        migrations::init_schema(&db).await?;

        info!(url = %url, "SurrealStore connected");
        Ok(Self {
            db,
            seq_lock: Mutex::new(()),
        })
    }

    async fn fetch_artifacts(&self, rid: &str) -> StorageResult<Vec<Artifact>> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query(
                "SELECT run_id, stage, seq, payload_json, digest, degraded, created_at \
                 FROM artifacts WHERE run_id = $rid ORDER BY seq ASC",
            )
            .bind(("rid", rid_owned))
            .await?;

        let rows: Vec<ArtifactRow> = res.take(0)?;
        rows.into_iter().map(ArtifactRow::into_artifact).collect()
    }

    async fn fetch_knowledge(&self) -> StorageResult<Vec<KnowledgeRow>> {
        let mut res = self
            .db
            .query("SELECT key, vector, payload_json FROM knowledge ORDER BY key ASC")
            .await?;
        Ok(res.take(0)?)
    }
}

#[async_trait]
impl ArtifactStore for SurrealStore {
    async fn put(&self, run_id: &RunId, artifact: NewArtifact) -> StorageResult<Artifact> {
        let _guard = self.seq_lock.lock().await;

        let mut res = self
            .db
            .query("SELECT seq FROM artifacts WHERE run_id = $rid ORDER BY seq DESC LIMIT 1")
            .bind(("rid", run_id.0.clone()))
            .await?;
        let last: Vec<SeqRow> = res.take(0)?;
        let seq = last.first().map(|r| r.seq + 1).unwrap_or(1);

        let sealed = artifact.seal(run_id, seq);
        let row = ArtifactRow::from_artifact(&sealed)?;

        self.db
            .query("CREATE artifacts CONTENT $row")
            .bind(("row", row))
            .await?
            .check()
            .map_err(|e| {
                debug!(run_id = %run_id, seq, error = %e, "artifact insert rejected");
                StorageError::Conflict {
                    run_id: run_id.0.clone(),
                    seq,
                }
            })?;

        debug!(run_id = %run_id, stage = %sealed.stage, seq, "artifact stored");
        Ok(sealed)
    }

    async fn get_latest(&self, run_id: &RunId, stage: &str) -> StorageResult<Artifact> {
        self.fetch_artifacts(&run_id.0)
            .await?
            .into_iter()
            .rev()
            .find(|a| a.stage == stage)
            .ok_or_else(|| StorageError::NotFound {
                run_id: run_id.0.clone(),
                stage: stage.to_string(),
            })
    }

    async fn get_all(&self, run_id: &RunId) -> StorageResult<Vec<Artifact>> {
        self.fetch_artifacts(&run_id.0).await
    }
}

#[async_trait]
impl RunRepository for SurrealStore {
    async fn save(&self, record: &RunRecord) -> StorageResult<()> {
        let row = RunRow::from_record(record)?;
        self.db
            .query("UPSERT type::thing('runs', $rid) CONTENT $row")
            .bind(("rid", record.run_id.0.clone()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let mut res = self
            .db
            .query(
                "SELECT run_id, status, snapshot_json, created_at, updated_at \
                 FROM runs WHERE run_id = $rid",
            )
            .bind(("rid", run_id.0.clone()))
            .await?;
        let rows: Vec<RunRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?
            .into_record()
    }

    async fn list(&self) -> StorageResult<Vec<RunRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT run_id, status, snapshot_json, created_at, updated_at \
                 FROM runs ORDER BY created_at ASC",
            )
            .await?;
        let rows: Vec<RunRow> = res.take(0)?;
        rows.into_iter().map(RunRow::into_record).collect()
    }
}

#[async_trait]
impl KnowledgeStore for SurrealStore {
    async fn upsert(
        &self,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> StorageResult<()> {
        let existing = self.fetch_knowledge().await?;
        if let Some(other) = existing.iter().find(|r| r.key != key) {
            if other.vector.len() != vector.len() {
                return Err(StorageError::DimensionMismatch {
                    expected: other.vector.len(),
                    actual: vector.len(),
                });
            }
        }

        let row = KnowledgeRow {
            key: key.to_string(),
            vector,
            payload_json: serde_json::to_string(&payload)?,
        };
        self.db
            .query("UPSERT type::thing('knowledge', $key) CONTENT $row")
            .bind(("key", key.to_string()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> StorageResult<Vec<KnowledgeMatch>> {
        let mut matches = Vec::new();
        for row in self.fetch_knowledge().await? {
            if row.vector.len() != vector.len() {
                continue;
            }
            matches.push(KnowledgeMatch {
                score: cosine_similarity(&row.vector, vector),
                payload: serde_json::from_str(&row.payload_json)?,
                key: row.key,
            });
        }
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn status(&self) -> StorageResult<KnowledgeStatus> {
        let keys: Vec<String> = self
            .fetch_knowledge()
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect();
        Ok(KnowledgeStatus {
            count: keys.len(),
            keys,
        })
    }
}
