//! HTTP integration tests for the close reconciler.
//!
//! Each test drives the full router against an in-memory ledger and a
//! wiremock proof oracle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;
use tokio::sync::Notify;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use close_reconciler::metrics::metric_names;
use close_reconciler::oracle::ProofMode;

use common::*;

// ============================================================================
// Test Helpers
// ============================================================================

/// Oracle answering every per-item request with a valid proof.
async fn per_item_oracle() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": VALID_PROOF })))
        .mount(&server)
        .await;
    server
}

async fn batch_oracle(proof: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/proof"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof": proof })))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Trigger
// ============================================================================

#[tokio::test]
async fn test_scenario_closes_valid_and_skips_unassigned() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (0, 0), (9, 5)]));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "results": [
                { "positionId": 7, "status": "closed", "txHash": tx_hash_for(7).to_string() },
                { "positionId": 0, "status": "skipped", "reason": "invalid id" },
                { "positionId": 9, "status": "closed", "txHash": tx_hash_for(9).to_string() },
            ]
        })
    );

    // Unassigned ids never reach the ledger
    let submitted: Vec<u64> = ledger.submissions().iter().map(|(id, _)| *id).collect();
    assert_eq!(submitted, vec![7, 9]);
    assert_eq!(ledger.submissions()[0].1, vec![0xde, 0xad, 0xbe, 0xef]);
}

#[tokio::test]
async fn test_get_trigger_runs_a_pass() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(4, 1)]));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::GET, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "closed");
    assert!(ledger.pending_ids().is_empty());
}

#[tokio::test]
async fn test_rediscovery_excludes_closed_positions() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (9, 5)]));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, first) = send_request(&app.router, Method::POST, "/confirm-close-all").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["results"].as_array().unwrap().len(), 2);

    let (status, second) = send_request(&app.router, Method::POST, "/confirm-close-all").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, json!({ "results": [] }));
    assert_eq!(ledger.submissions().len(), 2);
}

#[tokio::test]
async fn test_empty_discovery_returns_empty_results() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::default());
    let app = test_app(ledger, &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "results": [] }));
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(42, 8)]));
    ledger.fail_transiently(42, 3);
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "closed");
    assert_eq!(ledger.attempts_for(42), 4);
    assert_eq!(
        app.metrics.get_counter(metric_names::SUBMISSION_ATTEMPTS).await,
        4
    );
    assert_eq!(app.metrics.get_counter(metric_names::SUBMISSION_RETRIES).await, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_item_only() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(5, 1), (6, 2)]));
    ledger.fail_transiently(5, 100);
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["positionId"], 5);
    assert_eq!(body["results"][0]["status"], "failed");
    assert!(body["results"][0]["error"]
        .as_str()
        .unwrap()
        .contains("processing response error"));
    assert_eq!(body["results"][1]["status"], "closed");
    assert_eq!(ledger.attempts_for(5), 15);
    assert_eq!(ledger.pending_ids(), vec![5]);
}

#[tokio::test]
async fn test_dropped_request_does_not_cancel_pass() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(5, 1), (6, 2)]));
    ledger.fail_transiently(5, 3);
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    // Caller gives up while position 5 is still between retries
    let response = tokio::time::timeout(
        Duration::from_millis(15),
        send_request(&app.router, Method::POST, "/confirm-close-all"),
    )
    .await;
    assert!(response.is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !ledger.pending_ids().is_empty() || app.reconciler.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pass should finish after the caller went away");

    assert_eq!(ledger.attempts_for(5), 4);
    assert_eq!(ledger.attempts_for(6), 1);
    assert_eq!(app.metrics.get_counter(metric_names::POSITIONS_CLOSED).await, 2);
}

#[tokio::test]
async fn test_invalid_per_item_proof_fails_item_without_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": "notHex" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": VALID_PROOF })))
        .mount(&server)
        .await;

    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (9, 5)]));
    let app = test_app(ledger.clone(), &server.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "failed");
    assert_eq!(body["results"][1]["status"], "closed");
    assert_eq!(ledger.attempts_for(7), 0);
}

#[tokio::test]
async fn test_oracle_error_fails_item_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 3 })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": VALID_PROOF })))
        .mount(&server)
        .await;

    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (9, 5)]));
    let app = test_app(ledger.clone(), &server.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "failed");
    assert_eq!(body["results"][1]["status"], "closed");
}

// ============================================================================
// Pass-level failures
// ============================================================================

#[tokio::test]
async fn test_discovery_failure_returns_500() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3)]));
    ledger.fail_discovery("rpc unreachable");
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to confirm close requests");
    assert!(body["details"].as_str().unwrap().contains("rpc unreachable"));
    assert!(body.get("results").is_none());
    assert!(ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_invalid_batch_proof_aborts_pass() {
    let oracle = batch_oracle("notHex").await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (9, 5)]));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::Batch);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to confirm close requests");
    assert!(body["details"].as_str().unwrap().contains("invalid proof"));
    assert!(ledger.submissions().is_empty());
    assert_eq!(ledger.pending_ids(), vec![7, 9]);
    assert_eq!(app.metrics.get_counter(metric_names::PASSES_ABORTED).await, 1);
}

#[tokio::test]
async fn test_batch_proof_shared_by_all_items() {
    let oracle = batch_oracle("0x0102").await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (9, 5)]));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::Batch);

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
    for (_, proof) in ledger.submissions() {
        assert_eq!(proof, vec![0x01, 0x02]);
    }
    assert_eq!(oracle.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_trigger_gets_409() {
    let oracle = per_item_oracle().await;
    let gate = Arc::new(Notify::new());
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3)]).gated(gate.clone()));
    let app = test_app(ledger.clone(), &oracle.uri(), ProofMode::PerItem);

    let router = app.router.clone();
    let first = tokio::spawn(async move {
        send_request(&router, Method::POST, "/confirm-close-all").await
    });

    while !app.reconciler.is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = send_request(&app.router, Method::POST, "/confirm-close-all").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["details"].as_str().unwrap().contains("already running"));

    gate.notify_one();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["status"], "closed");
    assert_eq!(app.metrics.get_counter(metric_names::PASSES_REJECTED).await, 1);
}

// ============================================================================
// Debug, health and metrics
// ============================================================================

#[tokio::test]
async fn test_debug_endpoint_validates_without_submitting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": VALID_PROOF })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/get-proof"))
        .and(body_json(json!({ "index": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "proof_bytes": "0x" })))
        .mount(&server)
        .await;

    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (0, 0), (9, 5)]));
    let app = test_app(ledger.clone(), &server.uri(), ProofMode::PerItem);

    let (status, body) = send_request(&app.router, Method::GET, "/debug/close-requests").await;

    assert_eq!(status, StatusCode::OK);
    let debug = body["debug"].as_array().unwrap();
    assert_eq!(debug.len(), 3);
    assert_eq!(
        debug[0],
        json!({ "positionId": 7, "index": 3, "status": "valid", "proofLength": 4 })
    );
    assert_eq!(debug[1]["status"], "invalid");
    assert_eq!(debug[1]["reason"], "invalid id");
    assert_eq!(debug[2]["status"], "invalid");
    assert!(ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_health_reports_mode() {
    let oracle = per_item_oracle().await;
    let app = test_app(Arc::new(InMemoryLedger::default()), &oracle.uri(), ProofMode::Batch);

    let (status, body) = send_request(&app.router, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "close-reconciler");
    assert_eq!(body["proofMode"], "batch");
    assert_eq!(body["passInProgress"], false);
}

#[tokio::test]
async fn test_metrics_exposes_pass_counters() {
    let oracle = per_item_oracle().await;
    let ledger = Arc::new(InMemoryLedger::with_requests(&[(7, 3), (0, 0)]));
    let app = test_app(ledger, &oracle.uri(), ProofMode::PerItem);

    send_request(&app.router, Method::POST, "/confirm-close-all").await;
    let (status, bytes) = send_raw(&app.router, Method::GET, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("reconciler_passes_started 1"));
    assert!(text.contains("reconciler_positions_closed 1"));
    assert!(text.contains("reconciler_positions_skipped 1"));
}
