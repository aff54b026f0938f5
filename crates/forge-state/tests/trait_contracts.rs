//! Trait contract tests for ArtifactStore, RunRepository, and KnowledgeStore.
//!
//! Each contract is exercised against every backend: the in-memory fakes,
//! the filesystem store and SurrealDB (in-memory engine).

use chrono::Utc;
use forge_state::fakes::{MemoryArtifactStore, MemoryKnowledgeStore, MemoryRunRepository};
use forge_state::storage_traits::*;
use forge_state::{FsStore, StorageError, SurrealStore};
use serde_json::json;

// ===========================================================================
// ArtifactStore contract
// ===========================================================================

async fn artifact_seq_is_strictly_increasing(store: &dyn ArtifactStore) {
    let run = RunId::new();
    let mut last = 0;
    for stage in ["research", "design", "math_model", "math_model", "art"] {
        let art = store
            .put(&run, NewArtifact::new(stage, json!({"stage": stage})))
            .await
            .unwrap();
        assert!(art.seq > last, "seq {} not above {}", art.seq, last);
        last = art.seq;
    }

    let all = store.get_all(&run).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));
}

async fn artifact_latest_wins(store: &dyn ArtifactStore) {
    let run = RunId::new();
    store
        .put(&run, NewArtifact::new("math_model", json!({"rtp": 0.94})))
        .await
        .unwrap();
    store
        .put(&run, NewArtifact::new("design", json!({"theme": "vikings"})))
        .await
        .unwrap();
    let second = store
        .put(
            &run,
            NewArtifact::new("math_model", json!({"rtp": 0.965})).degraded(true),
        )
        .await
        .unwrap();

    let latest = store.get_latest(&run, "math_model").await.unwrap();
    assert_eq!(latest.seq, second.seq);
    assert_eq!(latest.payload["rtp"], json!(0.965));
    assert!(latest.degraded);

    // earlier artifact is untouched
    let all = store.get_all(&run).await.unwrap();
    assert_eq!(all[0].payload["rtp"], json!(0.94));
    assert!(all.iter().all(Artifact::verify));
}

async fn artifact_missing_stage_is_not_found(store: &dyn ArtifactStore) {
    let run = RunId::new();
    let err = store.get_latest(&run, "research").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    assert!(store.get_all(&run).await.unwrap().is_empty());
}

async fn artifacts_are_scoped_per_run(store: &dyn ArtifactStore) {
    let a = RunId::new();
    let b = RunId::new();
    store
        .put(&a, NewArtifact::new("research", json!({})))
        .await
        .unwrap();
    let first_b = store
        .put(&b, NewArtifact::new("research", json!({})))
        .await
        .unwrap();
    assert_eq!(first_b.seq, 1);
    assert!(store.get_latest(&b, "design").await.is_err());
}

async fn float_payload_reads_back_verified(store: &dyn ArtifactStore) {
    let run = RunId::new();
    let rtp_curve: Vec<f64> = (0..500).map(|i| 0.94 + (i as f64) / 23_987.0).collect();
    let payload = json!({
        "stats": {
            "rtp": 0.9651234567891234,
            "std_dev": 7.123456789012345,
            "ci99": [0.96123456789, 0.96901234567],
            "hit_frequency": 1.0 / 3.7,
        },
        "history": rtp_curve,
    });
    let written = store
        .put(&run, NewArtifact::new("math_model", payload.clone()))
        .await
        .unwrap();
    store
        .put(&run, NewArtifact::new("art", json!({"palette": ["gold"]})))
        .await
        .unwrap();

    let latest = store.get_latest(&run, "math_model").await.unwrap();
    assert_eq!(latest.digest, written.digest);
    assert_eq!(latest.payload, payload);
    assert_eq!(store.get_all(&run).await.unwrap().len(), 2);
}

async fn run_artifact_contract(store: &dyn ArtifactStore) {
    float_payload_reads_back_verified(store).await;
    artifact_seq_is_strictly_increasing(store).await;
    artifact_latest_wins(store).await;
    artifact_missing_stage_is_not_found(store).await;
    artifacts_are_scoped_per_run(store).await;
}

#[tokio::test]
async fn memory_artifact_store_contract() {
    run_artifact_contract(&MemoryArtifactStore::new()).await;
}

#[tokio::test]
async fn fs_artifact_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    run_artifact_contract(&FsStore::open(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn surreal_artifact_store_contract() {
    run_artifact_contract(&SurrealStore::in_memory().await.unwrap()).await;
}

// ===========================================================================
// RunRepository contract
// ===========================================================================

fn sample_record(status: &str) -> RunRecord {
    let now = Utc::now();
    RunRecord {
        run_id: RunId::new(),
        status: status.to_string(),
        snapshot: json!({"stage_index": 2, "mode": "interactive"}),
        created_at: now,
        updated_at: now,
    }
}

async fn run_repository_contract(repo: &dyn RunRepository) {
    let missing = repo.load(&RunId::new()).await.unwrap_err();
    assert!(matches!(missing, StorageError::RunNotFound { .. }));

    let mut record = sample_record("running");
    repo.save(&record).await.unwrap();

    record.status = "suspended".to_string();
    record.snapshot = json!({"stage_index": 3});
    repo.save(&record).await.unwrap();

    let loaded = repo.load(&record.run_id).await.unwrap();
    assert_eq!(loaded.status, "suspended");
    assert_eq!(loaded.snapshot, json!({"stage_index": 3}));

    let other = sample_record("completed");
    repo.save(&other).await.unwrap();
    let listed = repo.list().await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn memory_run_repository_contract() {
    run_repository_contract(&MemoryRunRepository::new()).await;
}

#[tokio::test]
async fn fs_run_repository_contract() {
    let dir = tempfile::tempdir().unwrap();
    run_repository_contract(&FsStore::open(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn surreal_run_repository_contract() {
    run_repository_contract(&SurrealStore::in_memory().await.unwrap()).await;
}

// ===========================================================================
// KnowledgeStore contract
// ===========================================================================

async fn knowledge_contract(store: &dyn KnowledgeStore) {
    assert!(store.query(&[1.0, 0.0, 0.0], 3).await.unwrap().is_empty());

    store
        .upsert("uk", vec![1.0, 0.0, 0.0], json!({"min_rtp": 0.80}))
        .await
        .unwrap();
    store
        .upsert("malta", vec![0.0, 1.0, 0.0], json!({"min_rtp": 0.85}))
        .await
        .unwrap();
    // replace, not duplicate
    store
        .upsert("uk", vec![0.9, 0.1, 0.0], json!({"min_rtp": 0.80, "v": 2}))
        .await
        .unwrap();

    let status = store.status().await.unwrap();
    assert_eq!(status.count, 2);
    assert_eq!(status.keys, vec!["malta".to_string(), "uk".to_string()]);

    let hits = store.query(&[1.0, 0.0, 0.0], 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, "uk");
    assert_eq!(hits[0].payload["v"], json!(2));

    let err = store
        .upsert("ontario", vec![1.0, 0.0], json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn memory_knowledge_store_contract() {
    knowledge_contract(&MemoryKnowledgeStore::new()).await;
}

#[tokio::test]
async fn fs_knowledge_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    knowledge_contract(&FsStore::open(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn surreal_knowledge_store_contract() {
    knowledge_contract(&SurrealStore::in_memory().await.unwrap()).await;
}
