//! Error types for close reconciliation

use std::time::Duration;

use thiserror::Error;

use crate::domain::ValidationError;

/// Whether retrying a failed submission can succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    /// Transport hiccup; the same submission may succeed on retry
    Transient,
    /// Contract-level rejection; retrying cannot succeed
    Permanent,
}

impl std::fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionErrorKind::Transient => write!(f, "transient"),
            SubmissionErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Errors that can occur while reconciling close requests
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Reading pending close requests from the ledger failed
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Proof service call failed or returned an unusable body
    #[error("proof oracle error: {0}")]
    Oracle(String),

    /// Proof failed shape validation
    #[error("invalid proof: {0}")]
    Validation(#[from] ValidationError),

    /// Close confirmation transaction failed
    #[error("{message}")]
    Submission {
        kind: SubmissionErrorKind,
        message: String,
    },

    /// A network call exceeded its time budget
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Another pass holds the single-flight guard
    #[error("a reconciliation pass is already running")]
    PassInProgress,

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ReconcileError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Submission {
            kind: SubmissionErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Submission {
            kind: SubmissionErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Whether a failed submission should be retried.
    ///
    /// Timeouts count as transient: the node may simply be slow.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Submission {
                kind: SubmissionErrorKind::Transient,
                ..
            } | ReconcileError::Timeout { .. }
        )
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
