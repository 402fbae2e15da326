//! On-chain ledger gateway
//!
//! Reads pending close requests from the trading contract and submits
//! close confirmations with their proofs.

use std::collections::HashMap;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::{RpcError, Transport, TransportError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::required_env;
use crate::domain::{CloseRequest, Proof};
use crate::infra::{LedgerGateway, ReconcileError, Result};

/// Gas limit attached to close confirmations unless configured otherwise
pub const DEFAULT_CLOSE_GAS_LIMIT: u64 = 800_000;

/// Node error text the legacy client reported for transport-level failures.
const PROCESSING_RESPONSE_ERROR: &str = "processing response error";

// Generate contract bindings
sol! {
    #[sol(rpc)]
    interface IPositionCloser {
        function getAllCloseRequests()
            external
            view
            returns (uint256[] positionIds, uint256[] assetIndexes);

        function confirmClosePositionWithProof(uint256 positionId, bytes proof) external;
    }
}

/// Ledger connection configuration
#[derive(Clone)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Trading contract address
    pub contract_address: Address,
    /// Private key for signing transactions
    pub private_key: String,
}

impl std::fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("rpc_url", &self.rpc_url)
            .field("contract_address", &self.contract_address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let rpc_url = required_env("RPC_URL")?;
        let contract_address = required_env("CONTRACT_ADDRESS")?
            .parse()
            .map_err(|e| ReconcileError::Configuration(format!("invalid CONTRACT_ADDRESS: {e}")))?;
        let private_key = required_env("PRIVATE_KEY")?;

        Ok(Self {
            rpc_url,
            contract_address,
            private_key,
        })
    }
}

/// What became of a close confirmation sent by an earlier attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightStatus {
    /// Mined with status 1
    Confirmed,
    /// Mined with status 0
    Reverted,
    /// Known to the node, not yet mined
    Pending,
    /// Unknown to the node; safe to send again
    Dropped,
}

impl InFlightStatus {
    /// `receipt_status` is `None` when the node has no receipt for the hash.
    pub fn from_lookup(receipt_status: Option<bool>, known_to_node: bool) -> Self {
        match receipt_status {
            Some(true) => InFlightStatus::Confirmed,
            Some(false) => InFlightStatus::Reverted,
            None if known_to_node => InFlightStatus::Pending,
            None => InFlightStatus::Dropped,
        }
    }
}

/// Ledger gateway backed by an alloy HTTP provider
pub struct AlloyLedgerGateway {
    rpc_url: reqwest::Url,
    contract_address: Address,
    wallet: EthereumWallet,
    /// Last confirmation sent per position whose receipt was never seen
    in_flight: Mutex<HashMap<u64, TxHash>>,
}

impl AlloyLedgerGateway {
    /// Parse the signing key and RPC URL once so bad credentials fail at startup.
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .trim()
            .parse()
            .map_err(|e| ReconcileError::Configuration(format!("Invalid private key: {}", e)))?;

        let rpc_url = config
            .rpc_url
            .parse()
            .map_err(|e| ReconcileError::Configuration(format!("Invalid RPC URL: {}", e)))?;

        info!(
            "Ledger gateway signing as {} against contract {}",
            signer.address(),
            config.contract_address
        );

        Ok(Self {
            rpc_url,
            contract_address: config.contract_address,
            wallet: EthereumWallet::from(signer),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a confirmation left unresolved by an earlier attempt.
    ///
    /// Returns the hash when that transaction already closed the position and
    /// `None` when a new transaction should be sent.
    async fn settle_in_flight<P, T>(&self, provider: &P, position_id: u64) -> Result<Option<TxHash>>
    where
        P: Provider<T>,
        T: Transport + Clone,
    {
        let Some(tx_hash) = self.in_flight.lock().await.get(&position_id).copied() else {
            return Ok(None);
        };

        let receipt = provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ReconcileError::transient(format!("Failed to check transaction {tx_hash}: {e}")))?;

        let known_to_node = match receipt {
            Some(_) => true,
            None => provider
                .get_transaction_by_hash(tx_hash)
                .await
                .map_err(|e| {
                    ReconcileError::transient(format!("Failed to check transaction {tx_hash}: {e}"))
                })?
                .is_some(),
        };

        match InFlightStatus::from_lookup(receipt.map(|r| r.status()), known_to_node) {
            InFlightStatus::Confirmed => {
                self.in_flight.lock().await.remove(&position_id);
                info!(position_id, %tx_hash, "Earlier close confirmation was mined");
                Ok(Some(tx_hash))
            }
            InFlightStatus::Reverted => {
                self.in_flight.lock().await.remove(&position_id);
                Err(ReconcileError::permanent(format!("transaction {tx_hash} reverted")))
            }
            InFlightStatus::Pending => Err(ReconcileError::transient(format!(
                "transaction {tx_hash} still pending"
            ))),
            InFlightStatus::Dropped => {
                self.in_flight.lock().await.remove(&position_id);
                warn!(position_id, %tx_hash, "Earlier close confirmation was dropped, resending");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl LedgerGateway for AlloyLedgerGateway {
    async fn discover_pending_closes(&self) -> Result<Vec<CloseRequest>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let contract = IPositionCloser::new(self.contract_address, &provider);

        let requests = contract
            .getAllCloseRequests()
            .call()
            .await
            .map_err(|e| ReconcileError::Discovery(format!("Contract call failed: {}", e)))?;

        let requests = zip_close_requests(&requests.positionIds, &requests.assetIndexes)?;
        debug!(count = requests.len(), "Read pending close requests");
        Ok(requests)
    }

    async fn submit_close_confirmation(
        &self,
        position_id: u64,
        proof: &Proof,
        gas_limit: u64,
    ) -> Result<TxHash> {
        // Create provider with signer and recommended fillers
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());

        if let Some(tx_hash) = self.settle_in_flight(&provider, position_id).await? {
            return Ok(tx_hash);
        }

        let contract = IPositionCloser::new(self.contract_address, &provider);

        let tx = contract
            .confirmClosePositionWithProof(U256::from(position_id), proof.clone().into_bytes())
            .gas(gas_limit);

        let pending = tx.send().await.map_err(|e| {
            let message = format!("Failed to send transaction: {}", e);
            match e {
                alloy::contract::Error::TransportError(ref err) => classify_transport_error(err, message),
                _ => classify_message(message),
            }
        })?;

        let tx_hash = *pending.tx_hash();
        info!(position_id, tx_hash = %tx_hash, "Close confirmation sent");

        // Recorded before waiting so a failed or cancelled wait is re-checked, not resent
        self.in_flight.lock().await.insert(position_id, tx_hash);

        // Wait for inclusion; an unconfirmed transaction is not a success
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| ReconcileError::transient(format!("Failed to get receipt: {}", e)))?;

        self.in_flight.lock().await.remove(&position_id);

        if !receipt.status() {
            return Err(ReconcileError::permanent(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }

        info!(
            position_id,
            tx_hash = %receipt.transaction_hash,
            block = receipt.block_number.unwrap_or(0),
            "Close confirmed"
        );

        Ok(receipt.transaction_hash)
    }
}

/// Zip the contract's parallel id/index arrays into requests, keeping order.
pub fn zip_close_requests(position_ids: &[U256], asset_indexes: &[U256]) -> Result<Vec<CloseRequest>> {
    if position_ids.len() != asset_indexes.len() {
        return Err(ReconcileError::Discovery(format!(
            "mismatched close request arrays: {} ids, {} indexes",
            position_ids.len(),
            asset_indexes.len()
        )));
    }

    position_ids
        .iter()
        .zip(asset_indexes)
        .map(|(id, index)| {
            let position_id = u64::try_from(*id)
                .map_err(|_| ReconcileError::Discovery(format!("position id {id} overflows u64")))?;
            let asset_index = u64::try_from(*index)
                .map_err(|_| ReconcileError::Discovery(format!("asset index {index} overflows u64")))?;
            Ok(CloseRequest::new(position_id, asset_index))
        })
        .collect()
}

/// Classify an RPC failure by its structure.
///
/// Error responses from the node (reverts, nonce or gas rejections) are final;
/// transport failures and unreadable responses may clear up on retry.
fn classify_transport_error(err: &TransportError, message: String) -> ReconcileError {
    match err {
        RpcError::Transport(_) | RpcError::NullResp | RpcError::DeserError { .. } => {
            ReconcileError::transient(message)
        }
        RpcError::ErrorResp(_) => ReconcileError::permanent(message),
        _ => classify_message(message),
    }
}

fn classify_message(message: String) -> ReconcileError {
    if message.contains(PROCESSING_RESPONSE_ERROR) {
        ReconcileError::transient(message)
    } else {
        ReconcileError::permanent(message)
    }
}
