//! Box folder file store.
//!
//! Lists and downloads files from one Box folder through the Box Content
//! API (v2.0) using a bearer token.
//!
//! # Configuration
//!
//! ```toml
//! [store]
//! kind = "box"
//! folder_id = "292829099684"
//! token_env = "BOX_ACCESS_TOKEN"
//! revision_field = "modified_at"   # or "created_at", "sha1"
//! include_globs = ["**/*.pdf"]
//! ```
//!
//! # Environment Variables
//!
//! - the variable named by `token_env` (default `BOX_ACCESS_TOKEN`), required
//!
//! Obtaining the token (JWT app auth, developer token) happens outside this
//! program.
//!
//! # Pagination
//!
//! Folder listings are fetched with offset paging, 1000 entries per page,
//! until `total_count` entries have been seen.
//!
//! # Revision Marker
//!
//! The marker is the raw string of the configured field. `modified_at`
//! changes whenever a new version is uploaded; `created_at` only changes
//! when a file is deleted and uploaded again; `sha1` tracks content.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{RevisionField, StoreConfig};
use crate::http::{send_with_retry, Replay};
use crate::models::{ItemKind, StoreItem};
use crate::traits::FileStore;

const SERVICE: &str = "box";
const PAGE_SIZE: usize = 1000;

pub struct BoxFileStore {
    http: reqwest::Client,
    api_base: String,
    token: String,
    folder_id: String,
    revision_field: RevisionField,
    max_retries: u32,
}

impl BoxFileStore {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        folder_id: impl Into<String>,
        revision_field: RevisionField,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            folder_id: folder_id.into(),
            revision_field,
            max_retries,
        })
    }

    /// Build from `[store]`, reading the token from the environment.
    pub fn from_config(store: &StoreConfig) -> Result<Self> {
        let token = match std::env::var(&store.token_env) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => bail!("{} environment variable not set", store.token_env),
        };
        let folder_id = store
            .folder_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("store.folder_id not configured"))?;
        Self::new(
            store.api_base.clone(),
            token,
            folder_id,
            store.revision_field,
            Duration::from_secs(store.timeout_secs),
            store.max_retries,
        )
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{}", self.api_base, path))
            .bearer_auth(&self.token)
    }

    async fn list_page(&self, offset: usize) -> Result<BoxItemPage> {
        let what = format!("folder {}", self.folder_id);
        let path = format!("folders/{}/items", self.folder_id);
        let query = [
            ("fields", "id,type,name,modified_at,created_at,sha1".to_string()),
            ("limit", PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
        ];
        let resp = send_with_retry(SERVICE, &what, self.max_retries, Replay::Safe, || {
            self.get(&path).query(&query)
        })
        .await?;
        Ok(resp.json().await?)
    }
}

/// One page of `GET /folders/{id}/items`.
#[derive(Debug, Deserialize)]
struct BoxItemPage {
    #[serde(default)]
    total_count: usize,
    #[serde(default)]
    entries: Vec<BoxItem>,
}

#[derive(Debug, Deserialize)]
struct BoxItem {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    sha1: Option<String>,
}

impl BoxItem {
    fn into_store_item(self, field: RevisionField) -> StoreItem {
        let kind = ItemKind::parse(&self.kind);
        let revision = match field {
            RevisionField::ModifiedAt => self.modified_at,
            RevisionField::CreatedAt => self.created_at,
            RevisionField::Sha1 => self.sha1,
        };
        if revision.is_none() && kind == ItemKind::File {
            tracing::warn!(document = %self.name, ?field, "file has no revision field");
        }
        StoreItem {
            id: self.id,
            name: self.name,
            kind,
            revision: revision.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl FileStore for BoxFileStore {
    fn label(&self) -> String {
        format!("box:{}", self.folder_id)
    }

    async fn list_items(&self) -> Result<Vec<StoreItem>> {
        let mut items = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = self.list_page(offset).await?;
            let count = page.entries.len();
            items.extend(
                page.entries
                    .into_iter()
                    .map(|e| e.into_store_item(self.revision_field)),
            );
            offset += count;
            if count == 0 || offset >= page.total_count {
                break;
            }
        }

        tracing::debug!(folder = %self.folder_id, count = items.len(), "listed box folder");
        Ok(items)
    }

    async fn get_content(&self, item_id: &str) -> Result<Vec<u8>> {
        let path = format!("files/{}/content", item_id);
        let what = format!("file {}", item_id);
        let resp =
            send_with_retry(SERVICE, &what, self.max_retries, Replay::Safe, || self.get(&path))
                .await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.api_base, item_id);
        let what = format!("file {}", item_id);
        send_with_retry(SERVICE, &what, self.max_retries, Replay::Safe, || {
            self.http.delete(&url).bearer_auth(&self.token)
        })
        .await?;
        Ok(())
    }
}
