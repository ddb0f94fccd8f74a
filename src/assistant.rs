//! OpenAI Assistants adapter.
//!
//! Implements [`Assistant`] over the threads/messages/runs endpoints and
//! [`SourceNames`] over `GET /files/{id}`. The adapter keeps no thread
//! state; every call names its thread.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::config::RunConfig;
use crate::models::{Annotation, AssistantTurn};
use crate::openai::{str_field, OpenAiClient};
use crate::traits::{Assistant, SourceNames};

/// Text of the message that carries an attached file.
const ATTACHMENT_NOTE: &str = "Attached a file for reference.";

pub struct OpenAiAssistant {
    client: OpenAiClient,
    run: RunConfig,
}

impl OpenAiAssistant {
    pub fn new(client: OpenAiClient, run: RunConfig) -> Self {
        Self { client, run }
    }

    /// Poll a run until it leaves the queued/in-progress states.
    async fn wait_for_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(self.run.timeout_secs);
        let path = format!("threads/{}/runs/{}", thread_id, run_id);

        loop {
            let run = self.client.get_json(&path, run_id).await?;
            let status = str_field(&run, "status")?;
            match status.as_str() {
                "completed" => return Ok(()),
                "queued" | "in_progress" | "cancelling" => {}
                other => {
                    let reason = run
                        .pointer("/last_error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no reason given");
                    bail!("run {} ended with status '{}': {}", run_id, other, reason);
                }
            }
            if Instant::now() >= deadline {
                bail!(
                    "run {} did not complete within {}s",
                    run_id,
                    self.run.timeout_secs
                );
            }
            tokio::time::sleep(Duration::from_millis(self.run.poll_interval_ms)).await;
        }
    }
}

#[async_trait]
impl SourceNames for OpenAiAssistant {
    async fn display_name(&self, object_id: &str) -> Result<String> {
        let file = self
            .client
            .get_json(&format!("files/{}", object_id), object_id)
            .await?;
        str_field(&file, "filename")
    }
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    async fn create_thread(&self) -> Result<String> {
        let thread = self
            .client
            .post_json("threads", &serde_json::json!({}), "thread")
            .await?;
        str_field(&thread, "id")
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.client
            .delete(&format!("threads/{}", thread_id), thread_id)
            .await?;
        Ok(())
    }

    async fn upload_file(&self, name: &str, content: Vec<u8>) -> Result<String> {
        let file = self.client.upload_file(name, &content).await?;
        str_field(&file, "id")
    }

    /// Attach through a user message carrying the file, so the thread's
    /// file search can reach it.
    async fn attach_file(&self, thread_id: &str, file_id: &str) -> Result<()> {
        self.client
            .post_json(
                &format!("threads/{}/messages", thread_id),
                &serde_json::json!({
                    "role": "user",
                    "content": ATTACHMENT_NOTE,
                    "attachments": [
                        { "file_id": file_id, "tools": [{ "type": "file_search" }] }
                    ],
                }),
                thread_id,
            )
            .await?;
        Ok(())
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        assistant_id: &str,
        question: &str,
    ) -> Result<AssistantTurn> {
        self.client
            .post_json(
                &format!("threads/{}/messages", thread_id),
                &serde_json::json!({ "role": "user", "content": question }),
                thread_id,
            )
            .await?;

        let run = self
            .client
            .post_json(
                &format!("threads/{}/runs", thread_id),
                &serde_json::json!({ "assistant_id": assistant_id }),
                thread_id,
            )
            .await?;
        let run_id = str_field(&run, "id")?;
        self.wait_for_run(thread_id, &run_id).await?;

        let messages = self
            .client
            .get_json(
                &format!(
                    "threads/{}/messages?run_id={}&order=desc&limit=1",
                    thread_id, run_id
                ),
                thread_id,
            )
            .await?;

        parse_latest_reply(&messages)
    }
}

/// Extract text and annotations from a `GET /threads/{id}/messages` page.
///
/// Takes the first assistant message in the page and the first text
/// block inside it.
pub fn parse_latest_reply(messages: &Value) -> Result<AssistantTurn> {
    let data = messages
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Invalid messages response: missing 'data'"))?;

    let message = data
        .iter()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .ok_or_else(|| anyhow::anyhow!("run produced no assistant message"))?;

    let text_block = message
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        })
        .and_then(|b| b.get("text"))
        .ok_or_else(|| anyhow::anyhow!("assistant message has no text content"))?;

    let text = text_block
        .get("value")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let annotations = text_block
        .get("annotations")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    let marker = a.get("text").and_then(Value::as_str)?;
                    let object_id = a
                        .pointer("/file_citation/file_id")
                        .and_then(Value::as_str);
                    Some(Annotation::new(marker, object_id))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(AssistantTurn { text, annotations })
}
