//! Liveness and metrics handlers

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

/// Response for the health check endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// `per_item` or `batch`
    pub proof_mode: String,
    /// Whether a pass is running right now
    pub pass_in_progress: bool,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        proof_mode: state.reconciler.proof_mode().to_string(),
        pass_in_progress: state.reconciler.is_busy(),
        uptime_seconds: state.metrics.uptime_seconds(),
    })
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus().await,
    )
}
