//! Append-only persistence for [`TriageRecord`]s.
//!
//! Records are inserted, never updated. Lookups always return the most
//! recent row (highest `id`) for the key.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{Triage, TriageRecord};

pub struct TriageStore {
    pool: SqlitePool,
}

impl TriageStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn insert(&self, record: &TriageRecord) -> Result<i64> {
        let topics_json = serde_json::to_string(&record.topics)?;

        let result = sqlx::query(
            r#"
            INSERT INTO triage_results (
                source_path, destination_path, checksum, file_size, file_extension,
                triage, confidence, reason, topics,
                llm_provider, llm_model, extracted_text_length, truncated,
                error_message, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.source_path)
        .bind(&record.destination_path)
        .bind(&record.checksum)
        .bind(record.file_size)
        .bind(&record.file_extension)
        .bind(record.triage.as_str())
        .bind(record.confidence)
        .bind(&record.reason)
        .bind(&topics_json)
        .bind(&record.llm_provider)
        .bind(&record.llm_model)
        .bind(record.extracted_text_length)
        .bind(record.truncated)
        .bind(&record.error_message)
        .bind(record.processed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent record for an exact source path.
    pub async fn latest_by_source_path(&self, source_path: &str) -> Result<Option<TriageRecord>> {
        let row = sqlx::query(
            "SELECT * FROM triage_results WHERE source_path = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Most recent record carrying `checksum`, whatever its path.
    pub async fn find_by_checksum(&self, checksum: &str) -> Result<Option<TriageRecord>> {
        let row =
            sqlx::query("SELECT * FROM triage_results WHERE checksum = ? ORDER BY id DESC LIMIT 1")
                .bind(checksum)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Number of stored records per category.
    pub async fn count_by_triage(&self) -> Result<HashMap<Triage, i64>> {
        let rows = sqlx::query("SELECT triage, COUNT(*) AS cnt FROM triage_results GROUP BY triage")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<Triage, i64> = Triage::ALL.iter().map(|t| (*t, 0)).collect();
        for row in rows {
            let triage: String = row.get("triage");
            let cnt: i64 = row.get("cnt");
            if let Ok(t) = triage.parse::<Triage>() {
                *counts.entry(t).or_insert(0) += cnt;
            }
        }
        Ok(counts)
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triage_results")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TriageRecord> {
    let triage: String = row.get("triage");
    let topics: Option<String> = row.get("topics");
    let processed_at: String = row.get("processed_at");

    Ok(TriageRecord {
        source_path: row.get("source_path"),
        destination_path: row.get("destination_path"),
        checksum: row.get("checksum"),
        file_size: row.get::<Option<i64>, _>("file_size").unwrap_or(0),
        file_extension: row
            .get::<Option<String>, _>("file_extension")
            .unwrap_or_default(),
        triage: triage.parse().map_err(anyhow::Error::msg)?,
        confidence: row.get("confidence"),
        reason: row.get("reason"),
        topics: match topics {
            Some(json) => serde_json::from_str(&json)
                .with_context(|| format!("Corrupt topics column: {}", json))?,
            None => Vec::new(),
        },
        llm_provider: row
            .get::<Option<String>, _>("llm_provider")
            .unwrap_or_default(),
        llm_model: row.get::<Option<String>, _>("llm_model").unwrap_or_default(),
        extracted_text_length: row
            .get::<Option<i64>, _>("extracted_text_length")
            .unwrap_or(0),
        truncated: row.get::<Option<bool>, _>("truncated").unwrap_or(false),
        error_message: row.get("error_message"),
        processed_at: DateTime::parse_from_rfc3339(&processed_at)
            .with_context(|| format!("Corrupt processed_at column: {}", processed_at))?
            .with_timezone(&Utc),
    })
}
