//! SurrealDB schema initialization
//!
//! Defines the `artifacts`, `runs` and `knowledge` tables. Safe to call on
//! every connection; `DEFINE ... IF NOT EXISTS` is idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all SlotForge tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing SlotForge SurrealDB schema");

    init_artifacts_table(db).await?;
    init_runs_table(db).await?;
    init_knowledge_table(db).await?;

    info!("SlotForge schema initialization complete");
    Ok(())
}

/// Initialize `artifacts` table
///
/// Schema:
/// ```text
/// TABLE artifacts {
///   run_id:        STRING
///   stage:         STRING
///   seq:           INT (monotonic within run)
///   payload_json:  STRING
///   digest:        STRING (sha-256 of payload)
///   degraded:      BOOL
///   created_at:    STRING (RFC 3339)
/// }
/// ```
///
/// `(run_id, seq)` is unique; rows are never updated or deleted.
async fn init_artifacts_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing artifacts table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS artifacts AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_artifact_run_seq ON TABLE artifacts COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_artifact_run_stage ON TABLE artifacts COLUMNS run_id, stage;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// Initialize `runs` table. One row per run, keyed by `runs:<run_id>`.
async fn init_runs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs AS SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_runs_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_runs_status ON TABLE runs COLUMNS status;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// Initialize `knowledge` table. One row per key, keyed by `knowledge:<key>`.
async fn init_knowledge_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing knowledge table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS knowledge AS SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_knowledge_key ON TABLE knowledge COLUMNS key UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
