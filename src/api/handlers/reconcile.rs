//! Reconciliation trigger and debug handlers.

use axum::extract::State;
use axum::Json;
use tracing::{error, info};

use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::{InspectionReport, InspectionResponse, PassResponse};
use crate::server::AppState;

/// POST|GET /confirm-close-all - Run one reconciliation pass.
///
/// Item failures are reported inside a 200 response; only pass-level
/// failures produce an error status.
///
/// The pass runs on its own task, so a caller that disconnects does not cut
/// it short between submissions.
pub async fn confirm_close_all(
    State(state): State<AppState>,
) -> Result<Json<PassResponse>, ApiError> {
    info!("Reconciliation pass triggered");

    let reconciler = state.reconciler.clone();
    let result = tokio::spawn(async move { reconciler.run_pass().await })
        .await
        .map_err(|e| {
            error!(error = %e, "Reconciliation task failed");
            ApiError::new(ErrorCode::PassAborted, e.to_string())
        })?
        .map_err(|e| ApiError::from_pass_error(&e))?;

    Ok(Json(PassResponse::from(&result)))
}

/// GET /debug/close-requests - Discover and validate without submitting.
pub async fn inspect_close_requests(
    State(state): State<AppState>,
) -> Result<Json<InspectionReport>, ApiError> {
    let entries = state
        .reconciler
        .inspect()
        .await
        .map_err(|e| ApiError::from_inspection_error(&e))?;

    Ok(Json(InspectionReport {
        debug: entries.iter().map(InspectionResponse::from).collect(),
    }))
}
