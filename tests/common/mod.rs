//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{TxHash, B256};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tokio::sync::Notify;
use tower::ServiceExt;

use close_reconciler::domain::{CloseRequest, Proof};
use close_reconciler::infra::{LedgerGateway, ReconcileError, Result, RetryConfig};
use close_reconciler::metrics::MetricsRegistry;
use close_reconciler::oracle::{HttpProofOracle, OracleConfig, ProofMode, ProofSource};
use close_reconciler::reconciler::{Reconciler, ReconcilerConfig};
use close_reconciler::server::{build_router, AppState};

/// Proof the mock oracle hands out for every index
pub const VALID_PROOF: &str = "0xdeadbeef";

/// Transaction hash the fake ledger reports for a position
pub fn tx_hash_for(position_id: u64) -> TxHash {
    B256::left_padding_from(&position_id.to_be_bytes())
}

/// Ledger held in memory: confirmed positions drop out of discovery.
#[derive(Default)]
pub struct InMemoryLedger {
    pending: Mutex<Vec<CloseRequest>>,
    /// Remaining transient failures per position id
    transient_failures: Mutex<HashMap<u64, u32>>,
    /// Every submission attempt, in order
    submissions: Mutex<Vec<(u64, Vec<u8>)>>,
    discovery_error: Mutex<Option<String>>,
    /// When set, discovery waits for a notification before answering
    discovery_gate: Option<Arc<Notify>>,
}

impl InMemoryLedger {
    pub fn with_requests(requests: &[(u64, u64)]) -> Self {
        Self {
            pending: Mutex::new(
                requests
                    .iter()
                    .map(|&(id, index)| CloseRequest::new(id, index))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.discovery_gate = Some(gate);
        self
    }

    pub fn fail_transiently(&self, position_id: u64, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(position_id, times);
    }

    pub fn fail_discovery(&self, message: &str) {
        *self.discovery_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn pending_ids(&self) -> Vec<u64> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.position_id)
            .collect()
    }

    pub fn submissions(&self) -> Vec<(u64, Vec<u8>)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, position_id: u64) -> usize {
        self.submissions()
            .iter()
            .filter(|(id, _)| *id == position_id)
            .count()
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn discover_pending_closes(&self) -> Result<Vec<CloseRequest>> {
        if let Some(gate) = &self.discovery_gate {
            gate.notified().await;
        }
        if let Some(message) = self.discovery_error.lock().unwrap().clone() {
            return Err(ReconcileError::Discovery(message));
        }
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn submit_close_confirmation(
        &self,
        position_id: u64,
        proof: &Proof,
        _gas_limit: u64,
    ) -> Result<TxHash> {
        self.submissions
            .lock()
            .unwrap()
            .push((position_id, proof.as_bytes().to_vec()));

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&position_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ReconcileError::transient(
                        "processing response error: connection reset",
                    ));
                }
            }
        }

        self.pending
            .lock()
            .unwrap()
            .retain(|r| r.position_id != position_id);
        Ok(tx_hash_for(position_id))
    }
}

/// Fully wired application around a fake ledger and an oracle URL.
pub struct TestApp {
    pub router: axum::Router,
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Retry quickly so exhausted-retry paths stay fast.
pub fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        retry: RetryConfig::fixed(0, Duration::from_millis(10)).with_max_attempts(15),
        call_timeout: Duration::from_secs(5),
        ..ReconcilerConfig::default()
    }
}

pub fn test_app(ledger: Arc<InMemoryLedger>, oracle_url: &str, mode: ProofMode) -> TestApp {
    let oracle = HttpProofOracle::new(&OracleConfig {
        base_url: oracle_url.to_string(),
        mode,
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();

    let metrics = Arc::new(MetricsRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        ledger,
        ProofSource::new(mode, Arc::new(oracle)),
        fast_config(),
        metrics.clone(),
    ));

    let router = build_router(AppState::new(reconciler.clone(), metrics.clone()), None).unwrap();

    TestApp {
        router,
        reconciler,
        metrics,
    }
}

/// Send a request to the test router and decode the JSON body.
pub async fn send_request(
    app: &axum::Router,
    method: Method,
    uri: &str,
) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send_raw(app, method, uri).await;

    let json = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&bytes) }))
    };

    (status, json)
}

pub async fn send_raw(app: &axum::Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec();

    (status, bytes)
}
