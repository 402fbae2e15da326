//! Per-item outcomes and the ordered result of one reconciliation pass.

use alloy::primitives::TxHash;
use std::fmt;

/// Skip reason recorded for requests without an assigned position id.
pub const INVALID_ID_REASON: &str = "invalid id";

/// Terminal status of a single close request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Closed,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Closed => write!(f, "closed"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// How a close request was resolved. Exactly one payload per status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Confirmation transaction was included
    Closed { tx_hash: TxHash },
    /// Proof acquisition, validation or submission failed
    Failed { error: String },
    /// Filtered out before any network call
    Skipped { reason: String },
}

impl Resolution {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Resolution::Closed { .. } => OutcomeStatus::Closed,
            Resolution::Failed { .. } => OutcomeStatus::Failed,
            Resolution::Skipped { .. } => OutcomeStatus::Skipped,
        }
    }
}

/// Outcome of one close request within one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub position_id: u64,
    pub resolution: Resolution,
    /// Number of submission calls made for this request
    pub attempts: u32,
}

impl AttemptOutcome {
    pub fn closed(position_id: u64, tx_hash: TxHash, attempts: u32) -> Self {
        Self {
            position_id,
            resolution: Resolution::Closed { tx_hash },
            attempts,
        }
    }

    pub fn failed(position_id: u64, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            position_id,
            resolution: Resolution::Failed {
                error: error.into(),
            },
            attempts,
        }
    }

    pub fn skipped(position_id: u64, reason: impl Into<String>) -> Self {
        Self {
            position_id,
            resolution: Resolution::Skipped {
                reason: reason.into(),
            },
            attempts: 0,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        self.resolution.status()
    }
}

/// Ordered outcomes of one pass, one entry per discovered request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassResult {
    outcomes: Vec<AttemptOutcome>,
}

impl PassResult {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, outcome: AttemptOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[AttemptOutcome] {
        &self.outcomes
    }

    /// Count outcomes with the given status
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status() == status)
            .count()
    }

    /// Total submission calls made during the pass
    pub fn total_attempts(&self) -> u64 {
        self.outcomes.iter().map(|o| u64::from(o.attempts)).sum()
    }
}

/// Result of checking one request's proof without submitting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionStatus {
    Valid { proof_length: usize },
    Invalid { reason: String },
}

/// Debug view of one discovered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionEntry {
    pub position_id: u64,
    pub asset_index: u64,
    pub status: InspectionStatus,
}
