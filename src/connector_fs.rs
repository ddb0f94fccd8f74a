//! Local folder file store.
//!
//! Serves a directory tree as the external store, for development and for
//! deployments that mirror a synced drive. Item ids and names are paths
//! relative to the root, using `/` separators. The revision marker is the
//! modification time in nanoseconds plus the file size.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::GlobSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::filter::build_globset;
use crate::models::StoreItem;
use crate::traits::FileStore;

pub struct FsFileStore {
    root: PathBuf,
    default_excludes: GlobSet,
}

impl FsFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Filesystem store root does not exist: {}", root.display());
        }
        let default_excludes = build_globset(&[
            "**/.git/**".to_string(),
            "**/node_modules/**".to_string(),
            "**/.DS_Store".to_string(),
        ])?;
        Ok(Self {
            root,
            default_excludes,
        })
    }

    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        let root = store
            .root
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("store.root not configured"))?;
        Self::new(root)
    }

    /// Map an item id back to a path, refusing anything outside the root.
    fn resolve(&self, item_id: &str) -> Result<PathBuf> {
        let rel = Path::new(item_id);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid item id: {}", item_id);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    fn label(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }

    async fn list_items(&self) -> Result<Vec<StoreItem>> {
        let mut items = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.default_excludes.is_match(&rel_str) {
                continue;
            }

            let metadata = entry.metadata()?;
            let modified_nanos = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();

            items.push(StoreItem::file(
                rel_str.clone(),
                rel_str,
                format!("{}:{}", modified_nanos, metadata.len()),
            ));
        }

        // Sort for deterministic ordering
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn get_content(&self, item_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(item_id)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let path = self.resolve(item_id)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))
    }
}
