//! Proof oracle client and per-pass proof acquisition
//!
//! The oracle computes proofs off-chain. Deployments use one of two modes:
//!
//! - **Per-item**: one `POST /get-proof` call per close request
//! - **Batch**: one `GET /proof` multiproof shared by every request in the pass

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{validate_proof, CloseRequest, Proof};
use crate::infra::{ProofOracle, ReconcileError, Result};

/// Proof service used when none is configured
pub const DEFAULT_PROOF_SERVICE_URL: &str = "https://proof-production.up.railway.app";

/// How proofs are acquired for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofMode {
    /// One proof per asset index
    #[default]
    PerItem,
    /// One multiproof for the whole pass
    Batch,
}

impl ProofMode {
    /// Parse from environment variable value
    pub fn from_env_value(value: &str) -> std::result::Result<Self, String> {
        match value.trim().to_lowercase().as_str() {
            "per_item" | "per-item" | "single" | "" => Ok(Self::PerItem),
            "batch" | "multi" | "multiproof" => Ok(Self::Batch),
            other => Err(format!(
                "Invalid proof mode: '{}'. Expected: per_item or batch",
                other
            )),
        }
    }
}

impl fmt::Display for ProofMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofMode::PerItem => write!(f, "per_item"),
            ProofMode::Batch => write!(f, "batch"),
        }
    }
}

/// Proof service configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Base URL of the proof service, without trailing slash
    pub base_url: String,
    pub mode: ProofMode,
    /// Transport-level timeout for each request
    pub request_timeout: Duration,
}

impl OracleConfig {
    /// Load configuration from environment variables
    pub fn from_env(request_timeout: Duration) -> Result<Self> {
        let base_url = std::env::var("PROOF_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_PROOF_SERVICE_URL.to_string());
        let mode = match std::env::var("PROOF_MODE") {
            Ok(v) => ProofMode::from_env_value(&v).map_err(ReconcileError::Configuration)?,
            Err(_) => ProofMode::default(),
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            request_timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct ProofRequest {
    index: u64,
}

#[derive(Debug, Deserialize)]
struct ProofBytesResponse {
    proof_bytes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MultiProofResponse {
    proof: Option<String>,
}

/// HTTP client for the proof service
pub struct HttpProofOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProofOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReconcileError::Configuration(format!("Invalid HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ReconcileError::Oracle(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ReconcileError::Oracle(e.to_string()))?;

        response
            .json::<T>()
            .await
            .map_err(|e| ReconcileError::Oracle(format!("malformed response body: {}", e)))
    }
}

#[async_trait]
impl ProofOracle for HttpProofOracle {
    async fn fetch_proof_for_index(&self, asset_index: u64) -> Result<String> {
        let url = format!("{}/get-proof", self.base_url);
        debug!(asset_index, "Fetching proof");

        let body: ProofBytesResponse = self
            .send_json(self.client.post(url).json(&ProofRequest { index: asset_index }))
            .await?;

        body.proof_bytes
            .ok_or_else(|| ReconcileError::Oracle("response is missing proof_bytes".to_string()))
    }

    async fn fetch_batch_proof(&self) -> Result<String> {
        let url = format!("{}/proof", self.base_url);
        debug!("Fetching batch proof");

        let body: MultiProofResponse = self.send_json(self.client.get(url)).await?;

        body.proof
            .ok_or_else(|| ReconcileError::Oracle("response is missing proof".to_string()))
    }
}

/// Configured proof acquisition strategy.
///
/// Selected once at startup; the reconciler only sees [`PassProofs`].
#[derive(Clone)]
pub enum ProofSource {
    PerItem(Arc<dyn ProofOracle>),
    Batch(Arc<dyn ProofOracle>),
}

impl ProofSource {
    pub fn new(mode: ProofMode, oracle: Arc<dyn ProofOracle>) -> Self {
        match mode {
            ProofMode::PerItem => ProofSource::PerItem(oracle),
            ProofMode::Batch => ProofSource::Batch(oracle),
        }
    }

    pub fn mode(&self) -> ProofMode {
        match self {
            ProofSource::PerItem(_) => ProofMode::PerItem,
            ProofSource::Batch(_) => ProofMode::Batch,
        }
    }

    /// Prepare proof acquisition for one pass.
    ///
    /// In batch mode this fetches and validates the multiproof; an error here
    /// means no request in the pass can be confirmed.
    pub async fn open_pass(&self, call_timeout: Duration) -> Result<PassProofs<'_>> {
        match self {
            ProofSource::PerItem(oracle) => Ok(PassProofs::PerItem {
                oracle: oracle.as_ref(),
                call_timeout,
            }),
            ProofSource::Batch(oracle) => {
                let text = with_timeout("batch proof fetch", call_timeout, oracle.fetch_batch_proof())
                    .await?;
                let proof = validate_proof(&text)?;
                info!(proof_length = proof.len(), "Batch proof acquired");
                Ok(PassProofs::Shared(proof))
            }
        }
    }
}

/// Pass-scoped proof acquisition
pub enum PassProofs<'a> {
    PerItem {
        oracle: &'a dyn ProofOracle,
        call_timeout: Duration,
    },
    /// Multiproof fetched once for the pass
    Shared(Proof),
}

impl PassProofs<'_> {
    /// Acquire and validate the proof for one request.
    pub async fn acquire_proof(&self, request: &CloseRequest) -> Result<Proof> {
        match self {
            PassProofs::PerItem {
                oracle,
                call_timeout,
            } => {
                let text = with_timeout(
                    "proof fetch",
                    *call_timeout,
                    oracle.fetch_proof_for_index(request.asset_index),
                )
                .await?;
                Ok(validate_proof(&text)?)
            }
            PassProofs::Shared(proof) => Ok(proof.clone()),
        }
    }
}

/// Bound a call by `after`; an elapsed budget becomes [`ReconcileError::Timeout`].
pub async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| ReconcileError::Timeout { operation, after })?
}
