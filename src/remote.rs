//! Errors reported by remote collaborators (source platform, review service).

use std::time::Duration;

use crate::credentials::QuotaMeta;
use crate::error::WallError;

/// Errors that can occur during a single remote call
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Timeouts, connection resets, 5xx
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The credential's quota is gone; the meta carries the authoritative reset
    #[error("Rate limited")]
    RateLimited { quota: QuotaMeta, retry_after: Option<Duration> },

    /// The credential itself was refused (revoked, expired)
    #[error("Credential rejected with status {0}")]
    CredentialRejected(u16),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-retryable refusal
    #[error("API error {status}: {message}")]
    Permanent { status: u16, message: String },

    /// Response arrived but could not be verified
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transient(_) => true,
            RemoteError::RateLimited { .. } => true,
            RemoteError::CredentialRejected(_) => true,
            RemoteError::NotFound(_) => false,
            RemoteError::Permanent { .. } => false,
            RemoteError::Malformed(_) => false,
        }
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => RemoteError::CredentialRejected(status),
            404 => RemoteError::NotFound(message),
            408 | 500..=599 => RemoteError::Transient(format!("HTTP {}: {}", status, message)),
            _ => RemoteError::Permanent { status, message },
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Malformed(e.to_string())
        } else {
            RemoteError::Transient(e.to_string())
        }
    }
}

impl From<RemoteError> for WallError {
    fn from(e: RemoteError) -> Self {
        if e.is_retryable() {
            WallError::TransientRemote(e.to_string())
        } else {
            WallError::PermanentRemote(e.to_string())
        }
    }
}

/// Truncate a response body for log and error messages.
pub fn truncate_body(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
