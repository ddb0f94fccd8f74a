//! SQLite record backend.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};

use super::RecordStore;
use crate::db;
use crate::migrate;
use crate::models::{DocumentRecord, RecordMap};

/// Records kept in the `document_records` table, one row per name.
pub struct SqliteRecordStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Connect and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load(&self) -> Result<RecordMap> {
        let rows = sqlx::query(
            r#"
            SELECT name, item_id, observed_revision, synced_revision,
                   indexed_object_id, pending_object_id, content_sha256, synced_at
            FROM document_records
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = RecordMap::new();
        for row in rows {
            let synced_at: Option<i64> = row.get("synced_at");
            records.insert(
                row.get("name"),
                DocumentRecord {
                    item_id: row.get("item_id"),
                    observed_revision: row.get("observed_revision"),
                    synced_revision: row.get("synced_revision"),
                    indexed_object_id: row.get("indexed_object_id"),
                    pending_object_id: row.get("pending_object_id"),
                    content_sha256: row.get("content_sha256"),
                    synced_at: synced_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                },
            );
        }
        Ok(records)
    }

    async fn save(&self, records: &RecordMap) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_records")
            .execute(&mut *tx)
            .await?;

        for (name, record) in records {
            sqlx::query(
                r#"
                INSERT INTO document_records (name, item_id, observed_revision, synced_revision,
                    indexed_object_id, pending_object_id, content_sha256, synced_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(name)
            .bind(&record.item_id)
            .bind(&record.observed_revision)
            .bind(&record.synced_revision)
            .bind(&record.indexed_object_id)
            .bind(&record.pending_object_id)
            .bind(&record.content_sha256)
            .bind(record.synced_at.map(|t| t.timestamp()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}
