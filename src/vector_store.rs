//! OpenAI vector store as the [`SearchIndex`].
//!
//! An upload is two calls: create a file (`purpose=assistants`), then
//! attach it to the vector store. The file id doubles as the object id
//! that assistant annotations cite. Confirmation polls the attachment
//! until the store reports it `completed`, and gives up after its own
//! deadline, deleting the file so nothing half-processed stays behind.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::error::is_not_found;
use crate::openai::{str_field, OpenAiClient};
use crate::traits::SearchIndex;

pub struct VectorStoreIndex {
    client: OpenAiClient,
    vector_store_id: String,
    poll_interval: Duration,
    confirm_timeout: Duration,
}

impl VectorStoreIndex {
    pub fn new(client: OpenAiClient, vector_store_id: String) -> Self {
        Self {
            client,
            vector_store_id,
            poll_interval: Duration::from_millis(1000),
            confirm_timeout: Duration::from_secs(90),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound on [`SearchIndex::confirm`]. Keep it below the caller's
    /// per-document timeout so the cleanup delete gets to run.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    fn file_path(&self, file_id: &str) -> String {
        format!("vector_stores/{}/files/{}", self.vector_store_id, file_id)
    }

    /// Poll until the store finishes processing `file_id`.
    async fn wait_until_indexed(&self, file_id: &str) -> Result<()> {
        loop {
            let json = self.client.get_json(&self.file_path(file_id), file_id).await?;
            match json.get("status").and_then(|s| s.as_str()) {
                Some("completed") => return Ok(()),
                Some("in_progress") | None => {}
                Some(other) => {
                    let reason = json
                        .pointer("/last_error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("no reason given");
                    bail!("vector store rejected file {} ({}): {}", file_id, other, reason);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Best-effort removal of a file that will never be recorded as indexed.
    async fn discard(&self, file_id: &str) {
        if let Err(e) = self.delete(file_id).await {
            tracing::warn!(file_id, "could not clean up file: {:#}", e);
        }
    }
}

#[async_trait]
impl SearchIndex for VectorStoreIndex {
    async fn upload(&self, name: &str, content: Vec<u8>) -> Result<String> {
        let file = self.client.upload_file(name, &content).await?;
        let file_id = str_field(&file, "id")?;

        let body = serde_json::json!({ "file_id": file_id });
        let path = format!("vector_stores/{}/files", self.vector_store_id);
        if let Err(e) = self.client.post_json(&path, &body, &file_id).await {
            self.discard(&file_id).await;
            return Err(e);
        }

        Ok(file_id)
    }

    async fn confirm(&self, object_id: &str) -> Result<()> {
        let outcome =
            tokio::time::timeout(self.confirm_timeout, self.wait_until_indexed(object_id)).await;
        let err = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => anyhow::anyhow!(
                "file {} not indexed within {:?}",
                object_id,
                self.confirm_timeout
            ),
        };
        self.discard(object_id).await;
        Err(err)
    }

    async fn delete(&self, object_id: &str) -> Result<()> {
        match self.client.delete(&self.file_path(object_id), object_id).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {
                tracing::debug!(object_id, "file was not attached to the vector store")
            }
            Err(e) => return Err(e),
        }
        self.client
            .delete(&format!("files/{}", object_id), object_id)
            .await?;
        Ok(())
    }
}
