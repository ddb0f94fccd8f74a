//! Record Store: the durable name → [`DocumentRecord`] mapping.
//!
//! The store is the ground truth for change detection. It is loaded once
//! at the start of a pass and saved in full at each barrier, so the unit
//! of consistency is the whole mapping as of the last save.
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `json` | [`JsonRecordStore`] | Pretty-printed, diffable, atomic rename on save |
//! | `sqlite` | [`SqliteRecordStore`] | One row per document, replaced in a transaction |
//! | (tests) | [`MemoryRecordStore`] | No persistence |
//!
//! [`DocumentRecord`]: crate::models::DocumentRecord

pub mod json;
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use json::JsonRecordStore;
pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use crate::config::{Config, RecordsBackend};
use crate::models::RecordMap;

/// Durable storage for the record mapping.
///
/// `load` on a store that has never been written returns an empty map.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self) -> Result<RecordMap>;

    async fn save(&self, records: &RecordMap) -> Result<()>;

    /// Human-readable location, for CLI output.
    fn describe(&self) -> String;
}

/// Open the backend selected by `[records]`.
pub async fn open(config: &Config) -> Result<Box<dyn RecordStore>> {
    let path = config.records.path.clone();
    Ok(match config.records.backend {
        RecordsBackend::Json => Box::new(JsonRecordStore::new(path)),
        RecordsBackend::Sqlite => Box::new(SqliteRecordStore::open(&path).await?),
    })
}
