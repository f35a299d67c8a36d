use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;

/// Create the database file (if needed) and the `triage_results` schema.
pub async fn run_migrations(db_path: &Path) -> Result<()> {
    let pool = db::connect(db_path).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation on an open pool.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triage_results (
            id INTEGER PRIMARY KEY,
            source_path TEXT NOT NULL,
            destination_path TEXT,
            checksum TEXT NOT NULL,
            file_size INTEGER,
            file_extension TEXT,
            triage TEXT NOT NULL,
            confidence REAL,
            reason TEXT,
            topics TEXT,
            llm_provider TEXT,
            llm_model TEXT,
            extracted_text_length INTEGER,
            truncated BOOLEAN,
            error_message TEXT,
            processed_at TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checksum ON triage_results(checksum)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_triage ON triage_results(triage)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_path ON triage_results(source_path)")
        .execute(pool)
        .await?;

    Ok(())
}
