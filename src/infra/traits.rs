//! Trait seams for the reconciler's external collaborators

use alloy::primitives::TxHash;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{CloseRequest, Proof};

use super::Result;

/// Read and write access to the trading contract.
///
/// Implementations are long-lived and shared across passes; each call is
/// independent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// List pending close requests in contract order.
    ///
    /// Any failure is reported as [`ReconcileError::Discovery`](super::ReconcileError::Discovery).
    async fn discover_pending_closes(&self) -> Result<Vec<CloseRequest>>;

    /// Submit a close confirmation and wait for it to be included.
    ///
    /// Returns the transaction hash only once the receipt reports success.
    /// Failures are [`ReconcileError::Submission`](super::ReconcileError::Submission)
    /// carrying a transient or permanent kind.
    async fn submit_close_confirmation(
        &self,
        position_id: u64,
        proof: &Proof,
        gas_limit: u64,
    ) -> Result<TxHash>;
}

/// External proof computation service.
///
/// Both calls return the proof as hex text; shape validation is the caller's job.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofOracle: Send + Sync {
    /// Fetch the proof bound to one asset index
    async fn fetch_proof_for_index(&self, asset_index: u64) -> Result<String>;

    /// Fetch the multiproof covering every pending request
    async fn fetch_batch_proof(&self) -> Result<String>;
}
