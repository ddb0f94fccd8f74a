//! JSON-file record backend.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::RecordStore;
use crate::models::RecordMap;

/// Records kept as one JSON object: `{ "<name>": { ...record... } }`.
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn load(&self) -> Result<RecordMap> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RecordMap::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read record file: {}", self.path.display())
                })
            }
        };

        if content.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "record file is empty, starting fresh");
            return Ok(RecordMap::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse record file: {}", self.path.display()))
    }

    async fn save(&self, records: &RecordMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "records.json".to_string());
        let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut body = serde_json::to_string_pretty(records)?;
        body.push('\n');
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e)
                .with_context(|| format!("Failed to replace {}", self.path.display()));
        }

        tracing::debug!(path = %self.path.display(), count = records.len(), "records saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
