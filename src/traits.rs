//! Collaborator traits.
//!
//! The sync engine and the citation resolver never talk to a network
//! service directly. They go through the traits below, which keeps the
//! core testable with in-process stubs and lets the HTTP adapters stay
//! thin.
//!
//! ```text
//! ┌──────────────┐   list/get    ┌────────────┐  upload/delete  ┌─────────────┐
//! │  FileStore   │──────────────▶│ detect +   │────────────────▶│ SearchIndex │
//! │ Box / folder │               │ sync       │                 │ vector store│
//! └──────────────┘               └────────────┘                 └─────────────┘
//!
//! ┌──────────────┐  run_turn     ┌────────────┐  display_name
//! │  Assistant   │──────────────▶│ citations  │◀─────────────── SourceNames
//! └──────────────┘               └────────────┘
//! ```
//!
//! All traits are `Send + Sync` and use `async-trait`, matching how the
//! adapters are shared behind `Arc` in the HTTP server.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, StoreKind};
use crate::models::{AssistantTurn, StoreItem};

// ═══════════════════════════════════════════════════════════════════════
// External file store
// ═══════════════════════════════════════════════════════════════════════

/// The external system of record for source documents.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Short label for logs, e.g. `"box:1234"`.
    fn label(&self) -> String;

    /// List the configured folder.
    ///
    /// Items of every kind are returned; callers decide what to keep.
    async fn list_items(&self) -> Result<Vec<StoreItem>>;

    /// Download the full content of an item.
    async fn get_content(&self, item_id: &str) -> Result<Vec<u8>>;

    /// Delete an item from the store.
    async fn delete_item(&self, item_id: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Search index
// ═══════════════════════════════════════════════════════════════════════

/// The managed index the assistant retrieves from.
///
/// Adding a document takes two steps: [`upload`](SearchIndex::upload)
/// creates the object and hands back its id straight away, and
/// [`confirm`](SearchIndex::confirm) waits until it is searchable. The
/// caller records the id between the two so an object whose confirmation
/// never finishes can still be found and deleted.
///
/// A delete of an object the index does not know should fail with
/// [`ServiceError::NotFound`] so callers can treat it as already gone.
///
/// [`ServiceError::NotFound`]: crate::error::ServiceError::NotFound
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create an object for `name` and return its id.
    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<String>;

    /// Wait until `object_id` is searchable. Indexes that confirm on
    /// upload need not override this.
    async fn confirm(&self, _object_id: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, object_id: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Assistant
// ═══════════════════════════════════════════════════════════════════════

/// Resolves an indexed object id to a human-readable document name.
#[async_trait]
pub trait SourceNames: Send + Sync {
    async fn display_name(&self, object_id: &str) -> Result<String>;
}

/// The conversational assistant service.
///
/// Every operation on a conversation takes its thread handle explicitly.
/// Implementations hold no per-conversation state.
#[async_trait]
pub trait Assistant: SourceNames {
    /// Create an empty conversation thread and return its handle.
    async fn create_thread(&self) -> Result<String>;

    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Upload a user-supplied file and return its id.
    async fn upload_file(&self, name: &str, content: Vec<u8>) -> Result<String>;

    /// Make an uploaded file available to later turns on `thread_id`.
    async fn attach_file(&self, thread_id: &str, file_id: &str) -> Result<()>;

    /// Post `question` to `thread_id`, run `assistant_id` on it to
    /// completion, and return the generated reply with its annotations.
    ///
    /// The service allows one active run per thread; callers serialize.
    async fn run_turn(
        &self,
        thread_id: &str,
        assistant_id: &str,
        question: &str,
    ) -> Result<AssistantTurn>;
}

// ═══════════════════════════════════════════════════════════════════════
// Construction from config
// ═══════════════════════════════════════════════════════════════════════

/// Build the file store selected by `[store]`.
///
/// Fails fast when credentials are missing.
pub fn file_store_from_config(config: &Config) -> Result<Arc<dyn FileStore>> {
    use crate::connector_box::BoxFileStore;
    use crate::connector_fs::FsFileStore;

    Ok(match config.store.kind {
        StoreKind::Box => Arc::new(BoxFileStore::from_config(&config.store)?),
        StoreKind::Filesystem => Arc::new(FsFileStore::from_config(&config.store)?),
    })
}

/// Build the vector store index from `[openai]`.
pub fn search_index_from_config(config: &Config) -> Result<Arc<dyn SearchIndex>> {
    use crate::openai::OpenAiClient;
    use crate::vector_store::VectorStoreIndex;

    let client = OpenAiClient::from_config(&config.openai)?;
    let index = VectorStoreIndex::new(client, config.openai.vector_store_id.clone())
        .with_poll_interval(Duration::from_millis(config.openai.index_poll_interval_ms))
        .with_confirm_timeout(config.openai.index_timeout());
    Ok(Arc::new(index))
}

/// Build the assistant client from `[openai]` and `[assistants.run]`.
pub fn assistant_from_config(config: &Config) -> Result<Arc<dyn Assistant>> {
    use crate::assistant::OpenAiAssistant;
    use crate::openai::OpenAiClient;

    let client = OpenAiClient::from_config(&config.openai)?;
    Ok(Arc::new(OpenAiAssistant::new(
        client,
        config.assistants.run.clone(),
    )))
}
