//! Forge-State: persistence layer for SlotForge
//!
//! This crate owns every byte the pipeline writes: stage artifacts, run
//! snapshots and the knowledge store consulted for jurisdiction data.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only artifacts, atomic writes, durable suspend/resume.
//!
//! ## Key Components
//!
//! - `ArtifactStore`: per-run, sequence-ordered stage outputs
//! - `RunRepository`: complete run snapshots keyed by run id
//! - `KnowledgeStore`: vector-ranked reference data
//! - `FsStore` / `SurrealStore`: durable backends; `fakes`: in-memory ones

mod error;
pub mod fakes;
pub mod fs_store;
mod migrations;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fs_store::FsStore;
pub use storage_traits::{
    cosine_similarity, Artifact, ArtifactStore, ContentDigest, KnowledgeMatch, KnowledgeStatus,
    KnowledgeStore, NewArtifact, RunId, RunRecord, RunRepository, StorageResult,
};
pub use surreal_store::SurrealStore;
