//! Error classification for calls to external collaborators.
//!
//! Application code uses `anyhow` throughout. Adapters that talk to the
//! file store, the search index, or the assistant service return a
//! [`ServiceError`] inside the `anyhow::Error` so callers can tell a
//! transient failure (worth a retry) from a missing object (worth
//! ignoring on delete) without string matching.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Rate limiting or a server-side failure. Retryable.
    #[error("{service} returned {status}: {body}")]
    Transient {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// Credentials missing, expired, or refused.
    #[error("{service} rejected credentials ({status}): {body}")]
    Auth {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service}: not found: {what}")]
    NotFound { service: &'static str, what: String },

    /// Any other client error. Not retryable.
    #[error("{service} rejected request ({status}): {body}")]
    Rejected {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0} timed out")]
    Timeout(String),
}

impl ServiceError {
    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(service: &'static str, status: u16, body: String, what: &str) -> Self {
        match status {
            401 | 403 => ServiceError::Auth {
                service,
                status,
                body,
            },
            404 => ServiceError::NotFound {
                service,
                what: what.to_string(),
            },
            429 | 500..=599 => ServiceError::Transient {
                service,
                status,
                body,
            },
            _ => ServiceError::Rejected {
                service,
                status,
                body,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transient { .. } | ServiceError::Timeout(_) => true,
            ServiceError::Http { source, .. } => !source.is_builder() && !source.is_decode(),
            _ => false,
        }
    }

    /// True when the service cannot have acted on the request: it was
    /// turned away by rate limiting, or the connection never opened.
    pub fn was_refused(&self) -> bool {
        match self {
            ServiceError::Transient { status, .. } => *status == 429,
            ServiceError::Http { source, .. } => source.is_connect(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }
}

/// True when `err` wraps a [`ServiceError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ServiceError>()
        .map(ServiceError::is_not_found)
        .unwrap_or(false)
}
