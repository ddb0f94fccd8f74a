//! In-memory record backend for tests.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::RecordStore;
use crate::models::RecordMap;

#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<RecordMap>,
    saves: RwLock<u64>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: RecordMap) -> Self {
        Self {
            records: RwLock::new(records),
            saves: RwLock::new(0),
        }
    }

    /// Snapshot of what was last saved.
    pub fn snapshot(&self) -> RecordMap {
        self.records
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> u64 {
        self.saves.read().map(|s| *s).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self) -> Result<RecordMap> {
        self.records
            .read()
            .map(|r| r.clone())
            .map_err(|_| anyhow!("record store lock poisoned"))
    }

    async fn save(&self, records: &RecordMap) -> Result<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| anyhow!("record store lock poisoned"))?;
        *guard = records.clone();
        if let Ok(mut saves) = self.saves.write() {
            *saves += 1;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
