//! HTTP surface: trigger, debug, health and metrics routes.

pub mod error;
pub mod handlers;
pub mod types;

use axum::routing::get;
use axum::Router;

use crate::server::AppState;

pub use error::{ApiError, ErrorCode};
pub use types::*;

/// Build the service router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/confirm-close-all",
            get(handlers::confirm_close_all).post(handlers::confirm_close_all),
        )
        .route("/debug/close-requests", get(handlers::inspect_close_requests))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
