//! TOML configuration.
//!
//! The whole program is driven by one [`Config`] built once at startup by
//! [`load_config`] and passed by reference into each component. Every
//! validation failure here is fatal: nothing downstream works with a
//! half-valid config.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub records: RecordsConfig,
    pub store: StoreConfig,
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub assistants: AssistantsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordsBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordsConfig {
    #[serde(default = "default_records_backend")]
    pub backend: RecordsBackend,
    pub path: PathBuf,
}

fn default_records_backend() -> RecordsBackend {
    RecordsBackend::Json
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Box,
    Filesystem,
}

/// Which Box field is used as the document revision marker.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevisionField {
    ModifiedAt,
    CreatedAt,
    Sha1,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_box_token_env")]
    pub token_env: String,
    #[serde(default = "default_box_api_base")]
    pub api_base: String,
    #[serde(default = "default_revision_field")]
    pub revision_field: RevisionField,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_box_token_env() -> String {
    "BOX_ACCESS_TOKEN".to_string()
}
fn default_box_api_base() -> String {
    "https://api.box.com/2.0".to_string()
}
fn default_revision_field() -> RevisionField {
    RevisionField::ModifiedAt
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_store_timeout_secs() -> u64 {
    60
}

impl StoreConfig {
    /// Label used in logs and CLI output, e.g. `box:1234` or `filesystem:./docs`.
    pub fn label(&self) -> String {
        match self.kind {
            StoreKind::Box => format!("box:{}", self.folder_id.as_deref().unwrap_or("0")),
            StoreKind::Filesystem => format!(
                "filesystem:{}",
                self.root
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    pub vector_store_id: String,
    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How often to poll the vector store while a file is processed.
    #[serde(default = "default_index_poll_interval_ms")]
    pub index_poll_interval_ms: u64,
    /// How long to wait for a file to become searchable before deleting it.
    /// Must be shorter than `sync.document_timeout_secs`.
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_openai_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_index_poll_interval_ms() -> u64 {
    1000
}
fn default_index_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,
    #[serde(default)]
    pub prune_missing: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            document_timeout_secs: default_document_timeout_secs(),
            prune_missing: false,
        }
    }
}

fn default_document_timeout_secs() -> u64 {
    120
}

impl SyncConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantsConfig {
    /// Variant used for sessions that never picked one.
    pub default: String,
    /// Variant name → assistant id.
    pub variants: BTreeMap<String, String>,
    #[serde(default)]
    pub run: RunConfig,
}

impl AssistantsConfig {
    pub fn assistant_id(&self, variant: &str) -> Option<&str> {
        self.variants.get(variant).map(String::as_str)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_run_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_run_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.store.kind {
        StoreKind::Box => {
            if config.store.folder_id.as_deref().map_or(true, str::is_empty) {
                bail!("store.folder_id must be set when store.kind = \"box\"");
            }
        }
        StoreKind::Filesystem => {
            if config.store.root.is_none() {
                bail!("store.root must be set when store.kind = \"filesystem\"");
            }
        }
    }

    if config.store.include_globs.is_empty() {
        bail!("store.include_globs must not be empty");
    }

    if config.openai.vector_store_id.trim().is_empty() {
        bail!("openai.vector_store_id must not be empty");
    }
    if config.openai.timeout_secs == 0 || config.store.timeout_secs == 0 {
        bail!("timeout_secs must be > 0");
    }
    if config.openai.index_poll_interval_ms == 0 {
        bail!("openai.index_poll_interval_ms must be > 0");
    }

    if config.sync.document_timeout_secs == 0 {
        bail!("sync.document_timeout_secs must be > 0");
    }
    if config.openai.index_timeout_secs == 0
        || config.openai.index_timeout_secs >= config.sync.document_timeout_secs
    {
        bail!(
            "openai.index_timeout_secs must be > 0 and below sync.document_timeout_secs ({})",
            config.sync.document_timeout_secs
        );
    }

    if config.assistants.variants.is_empty() {
        bail!("assistants.variants must define at least one assistant");
    }
    if !config
        .assistants
        .variants
        .contains_key(&config.assistants.default)
    {
        bail!(
            "assistants.default '{}' is not one of the configured variants: {}",
            config.assistants.default,
            config
                .assistants
                .variants
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if config.assistants.run.poll_interval_ms == 0 || config.assistants.run.timeout_secs == 0 {
        bail!("assistants.run intervals must be > 0");
    }

    Ok(())
}
