//! Error types for shamewall
//!
//! Centralized error handling using thiserror. Errors are either entity-scoped
//! (the run moves on to the next entity) or run-fatal (the ledger can no longer be
//! trusted, so the whole run stops).

use thiserror::Error;

use crate::store::PipelinePhase;

/// All error types that can occur in shamewall
#[derive(Debug, Error)]
pub enum WallError {
    /// Remote call failed in a way that may succeed on retry
    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    /// Remote call failed for good; terminal for the entity, not the run
    #[error("Permanent remote error: {0}")]
    PermanentRemote(String),

    /// A phase was attempted out of order; the ledger is untrustworthy
    #[error("Sequence violation for {entity}: cannot record {attempted:?}, expected {expected:?}")]
    SequenceViolation {
        entity: String,
        attempted: PipelinePhase,
        expected: Option<PipelinePhase>,
    },

    /// The asynchronous review never arrived within the poll bounds
    #[error("Poll timeout after {attempts} attempts ({waited_secs}s)")]
    PollTimeout { attempts: u32, waited_secs: u64 },

    /// Every credential in the pool was rejected by the remote
    #[error("No usable credentials: all {0} credentials were revoked")]
    NoUsableCredentials(usize),

    /// Operator abort
    #[error("Cancelled")]
    Cancelled,

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WallError {
    /// Errors that halt the whole run rather than a single entity.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            WallError::SequenceViolation { .. } | WallError::Storage(_) | WallError::Sqlite(_)
        )
    }

    /// Errors worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WallError::TransientRemote(_))
    }
}

/// Result type alias for shamewall operations
pub type Result<T> = std::result::Result<T, WallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_violation_display() {
        let err = WallError::SequenceViolation {
            entity: "octocat".to_string(),
            attempted: PipelinePhase::ReviewTriggered,
            expected: Some(PipelinePhase::BranchCreated),
        };
        assert_eq!(
            err.to_string(),
            "Sequence violation for octocat: cannot record ReviewTriggered, expected Some(BranchCreated)"
        );
    }

    #[test]
    fn test_poll_timeout_display() {
        let err = WallError::PollTimeout {
            attempts: 20,
            waited_secs: 600,
        };
        assert_eq!(err.to_string(), "Poll timeout after 20 attempts (600s)");
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(
            WallError::SequenceViolation {
                entity: "a".to_string(),
                attempted: PipelinePhase::Forked,
                expected: None,
            }
            .is_run_fatal()
        );
        assert!(WallError::Storage("disk full".to_string()).is_run_fatal());
        assert!(!WallError::PermanentRemote("404".to_string()).is_run_fatal());
        assert!(!WallError::PollTimeout { attempts: 1, waited_secs: 1 }.is_run_fatal());
        assert!(!WallError::Cancelled.is_run_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WallError::TransientRemote("502".to_string()).is_retryable());
        assert!(!WallError::PermanentRemote("404".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WallError = io_err.into();
        assert!(matches!(err, WallError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WallError = json_err.into();
        assert!(matches!(err, WallError::Json(_)));
    }
}
