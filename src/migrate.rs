use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, RecordsBackend};
use crate::db;

/// Prepare the configured record store.
///
/// For the SQLite backend this creates the schema; for the JSON backend it
/// writes an empty record file if none exists. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    match config.records.backend {
        RecordsBackend::Sqlite => {
            let pool = db::connect(&config.records.path).await?;
            create_schema(&pool).await?;
            pool.close().await;
        }
        RecordsBackend::Json => {
            let path = &config.records.path;
            if !path.exists() {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(path, "{}\n")?;
            }
        }
    }
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_records (
            name TEXT PRIMARY KEY,
            item_id TEXT,
            observed_revision TEXT,
            synced_revision TEXT,
            indexed_object_id TEXT,
            pending_object_id TEXT,
            content_sha256 TEXT,
            synced_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before pending uploads were tracked.
    let has_pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('document_records') WHERE name = 'pending_object_id'",
    )
    .fetch_one(pool)
    .await?;
    if has_pending == 0 {
        sqlx::query("ALTER TABLE document_records ADD COLUMN pending_object_id TEXT")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_records_object ON document_records(indexed_object_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
