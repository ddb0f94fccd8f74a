//! Retrying HTTP send shared by the Box and OpenAI adapters.
//!
//! Retry strategy for [`Replay::Safe`] requests (GET, DELETE):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! [`Replay::Refused`] requests (POSTs that create something) are only
//! retried on 429 and on connection failures. A timeout or a 5xx may
//! arrive after the service already acted, and a retry would create a
//! second file, message, or run.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::error::ServiceError;

/// Which failures a request may be repeated after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Repeating has no further effect.
    Safe,
    /// Repeat only when the service cannot have acted on the request.
    Refused,
}

/// Whether `err` warrants another attempt under `replay`.
pub fn should_retry(err: &ServiceError, replay: Replay) -> bool {
    err.is_retryable() && (replay == Replay::Safe || err.was_refused())
}

/// Send the request produced by `build`, retrying transient failures as
/// `replay` allows.
///
/// `build` is called once per attempt because request bodies (multipart
/// forms in particular) cannot be replayed. `what` names the target in
/// errors, e.g. `"file 123"`.
pub async fn send_with_retry<F>(
    service: &'static str,
    what: &str,
    max_retries: u32,
    replay: Replay,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err: Option<ServiceError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        let err = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                ServiceError::from_status(service, status, body, what)
            }
            Err(e) if e.is_timeout() => ServiceError::Timeout(format!("{} {}", service, what)),
            Err(e) => ServiceError::Http { service, source: e },
        };

        if !should_retry(&err, replay) {
            return Err(err.into());
        }
        tracing::warn!(service, what, attempt, "transient failure, will retry: {}", err);
        last_err = Some(err);
    }

    Err(last_err
        .map(anyhow::Error::from)
        .unwrap_or_else(|| anyhow!("{} {}: no attempt made", service, what)))
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
