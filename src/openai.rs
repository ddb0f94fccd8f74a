//! Minimal OpenAI REST client shared by the vector store and assistant
//! adapters.
//!
//! Sends JSON (and multipart for file uploads) with the bearer key and the
//! `OpenAI-Beta: assistants=v2` header, through [`send_with_retry`].
//! Every POST here creates something, so POSTs use [`Replay::Refused`].
//! The API key is read from the environment variable named in
//! `[openai].api_key_env` once, at construction.

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::http::{send_with_retry, Replay};

const SERVICE: &str = "openai";

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_retries,
        })
    }

    /// Build from config, failing if the API key variable is unset.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::new(
            config.api_base.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    pub async fn get_json(&self, path: &str, what: &str) -> Result<Value> {
        let resp = send_with_retry(SERVICE, what, self.max_retries, Replay::Safe, || {
            self.request(reqwest::Method::GET, path)
        })
        .await?;
        Ok(resp.json().await?)
    }

    pub async fn post_json(&self, path: &str, body: &Value, what: &str) -> Result<Value> {
        let resp = send_with_retry(SERVICE, what, self.max_retries, Replay::Refused, || {
            self.request(reqwest::Method::POST, path).json(body)
        })
        .await?;
        Ok(resp.json().await?)
    }

    pub async fn delete(&self, path: &str, what: &str) -> Result<Value> {
        let resp = send_with_retry(SERVICE, what, self.max_retries, Replay::Safe, || {
            self.request(reqwest::Method::DELETE, path)
        })
        .await?;
        Ok(resp.json().await.unwrap_or(Value::Null))
    }

    /// Upload `content` as a file with `purpose=assistants`.
    pub async fn upload_file(&self, file_name: &str, content: &[u8]) -> Result<Value> {
        let resp = send_with_retry(SERVICE, file_name, self.max_retries, Replay::Refused, || {
            let part = reqwest::multipart::Part::bytes(content.to_vec())
                .file_name(file_name.to_string());
            let form = reqwest::multipart::Form::new()
                .text("purpose", "assistants")
                .part("file", part);
            self.request(reqwest::Method::POST, "files").multipart(form)
        })
        .await?;
        Ok(resp.json().await?)
    }
}

/// Pull a required string field out of a JSON response.
pub fn str_field(json: &Value, field: &str) -> Result<String> {
    match json.get(field).and_then(Value::as_str) {
        Some(s) => Ok(s.to_string()),
        None => bail!("Invalid OpenAI response: missing '{}'", field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joining() {
        let c = OpenAiClient::new("http://x/v1/", "k", Duration::from_secs(1), 0).unwrap();
        assert_eq!(c.url("/files"), "http://x/v1/files");
        assert_eq!(c.url("vector_stores/vs/files"), "http://x/v1/vector_stores/vs/files");
    }

    #[test]
    fn str_field_missing() {
        let v = serde_json::json!({ "id": "file-1", "n": 3 });
        assert_eq!(str_field(&v, "id").unwrap(), "file-1");
        assert!(str_field(&v, "n").is_err());
        assert!(str_field(&v, "status").is_err());
    }
}
