//! Per-user conversation sessions.
//!
//! Maps a user id to the assistant variant that user picked and the
//! conversation thread currently in use. The assistant client itself holds
//! no conversation state; every call receives the thread handle from here.
//!
//! The assistant service allows one active run per thread, so each session
//! carries an async mutex that is held for the whole of an `ask`.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::citations::resolve_citations;
use crate::config::AssistantsConfig;
use crate::models::ResolvedAnswer;
use crate::traits::Assistant;

/// Reply for a blank question. No service call is made.
pub const EMPTY_QUESTION_REPLY: &str = "Please enter a question.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown assistant variant '{variant}' (configured: {known})")]
    UnknownVariant { variant: String, known: String },
}

#[derive(Debug, Clone)]
struct Session {
    variant: String,
    thread_id: Option<String>,
}

type SessionSlot = Arc<tokio::sync::Mutex<Session>>;

pub struct SessionRegistry {
    assistant: Arc<dyn Assistant>,
    assistants: AssistantsConfig,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new(assistant: Arc<dyn Assistant>, assistants: AssistantsConfig) -> Self {
        Self {
            assistant,
            assistants,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, user: &str) -> SessionSlot {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(user.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(Session {
                    variant: self.assistants.default.clone(),
                    thread_id: None,
                }))
            })
            .clone()
    }

    fn existing(&self, user: &str) -> Option<SessionSlot> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user)
            .cloned()
    }

    /// Switch `user` to `variant`. The current thread is dropped; a new one
    /// is created on next use.
    pub async fn set_variant(&self, user: &str, variant: &str) -> Result<()> {
        if self.assistants.assistant_id(variant).is_none() {
            return Err(SessionError::UnknownVariant {
                variant: variant.to_string(),
                known: self
                    .assistants
                    .variants
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into());
        }

        let slot = self.slot(user);
        let mut session = slot.lock().await;
        if session.variant == variant {
            return Ok(());
        }
        let old = session.thread_id.take();
        session.variant = variant.to_string();
        drop(session);

        if let Some(thread_id) = old {
            self.discard_thread(&thread_id).await;
        }
        tracing::info!(user, variant, "set assistant variant");
        Ok(())
    }

    /// Variant in use for `user`; the configured default for unknown users.
    pub async fn active_variant(&self, user: &str) -> String {
        match self.existing(user) {
            Some(slot) => slot.lock().await.variant.clone(),
            None => self.assistants.default.clone(),
        }
    }

    /// Start a fresh thread for `user`, replacing any previous one.
    pub async fn create_thread(&self, user: &str) -> Result<String> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;

        let thread_id = self.assistant.create_thread().await?;
        if let Some(old) = session.thread_id.replace(thread_id.clone()) {
            self.discard_thread(&old).await;
        }
        tracing::info!(user, thread = %thread_id, "created thread");
        Ok(thread_id)
    }

    /// Delete the thread of `user`. Returns false when there was none.
    pub async fn delete_thread(&self, user: &str) -> Result<bool> {
        let Some(slot) = self.existing(user) else {
            return Ok(false);
        };
        let mut session = slot.lock().await;
        let Some(thread_id) = session.thread_id.clone() else {
            return Ok(false);
        };

        self.assistant.delete_thread(&thread_id).await?;
        session.thread_id = None;
        tracing::info!(user, thread = %thread_id, "deleted thread");
        Ok(true)
    }

    /// Ask `question` on behalf of `user` and return the cleaned answer.
    pub async fn ask(&self, user: &str, question: &str) -> Result<ResolvedAnswer> {
        if question.trim().is_empty() {
            return Ok(ResolvedAnswer {
                text: EMPTY_QUESTION_REPLY.to_string(),
                citations: Vec::new(),
            });
        }

        let slot = self.slot(user);
        let mut session = slot.lock().await;

        let assistant_id = self
            .assistants
            .assistant_id(&session.variant)
            .ok_or_else(|| anyhow::anyhow!("variant '{}' is not configured", session.variant))?
            .to_string();

        let thread_id = self.thread_of(user, &mut session).await?;

        let turn = self
            .assistant
            .run_turn(&thread_id, &assistant_id, question)
            .await?;
        let mut answer =
            resolve_citations(&turn.text, &turn.annotations, self.assistant.as_ref()).await;
        answer.text = answer.text.trim().to_string();

        tracing::debug!(
            user,
            variant = %session.variant,
            citations = answer.citations.len(),
            "answered question"
        );
        Ok(answer)
    }

    /// Upload a file on behalf of `user` and return its id. The file is
    /// not visible to any thread until [`attach_file`](Self::attach_file).
    pub async fn upload_file(&self, user: &str, name: &str, content: Vec<u8>) -> Result<String> {
        let size = content.len();
        let file_id = self.assistant.upload_file(name, content).await?;
        tracing::info!(user, file = %file_id, name, size, "uploaded user file");
        Ok(file_id)
    }

    /// Attach `file_id` to the thread of `user`, starting one if needed.
    /// Returns the thread handle.
    pub async fn attach_file(&self, user: &str, file_id: &str) -> Result<String> {
        let slot = self.slot(user);
        let mut session = slot.lock().await;
        let thread_id = self.thread_of(user, &mut session).await?;

        self.assistant.attach_file(&thread_id, file_id).await?;
        tracing::info!(user, thread = %thread_id, file = %file_id, "attached file");
        Ok(thread_id)
    }

    /// Thread of a locked session, created on first use.
    async fn thread_of(&self, user: &str, session: &mut Session) -> Result<String> {
        if let Some(id) = &session.thread_id {
            return Ok(id.clone());
        }
        let id = self.assistant.create_thread().await?;
        tracing::info!(user, thread = %id, "created thread on first use");
        session.thread_id = Some(id.clone());
        Ok(id)
    }

    async fn discard_thread(&self, thread_id: &str) {
        if let Err(e) = self.assistant.delete_thread(thread_id).await {
            tracing::warn!(thread = %thread_id, "failed to delete replaced thread: {:#}", e);
        }
    }
}
