//! API error responses
//!
//! Pass-level failures map to `{ "error", "details" }` bodies. Item-level
//! failures never reach this module: they are part of a successful response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infra::ReconcileError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Discovery or batch proof acquisition failed
    PassAborted,
    /// Debug inspection could not run
    InspectionFailed,
    /// Another pass is running
    PassInProgress,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::PassAborted => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InspectionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PassInProgress => StatusCode::CONFLICT,
        }
    }

    /// Generic message shown to callers
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::PassAborted => "Failed to confirm close requests",
            ErrorCode::InspectionFailed => "Failed to inspect close requests",
            ErrorCode::PassInProgress => "Close confirmation already in progress",
        }
    }
}

/// Error body returned for pass-level failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    pub code: Option<ErrorCode>,
    /// Generic message
    pub error: String,
    /// Underlying detail string
    pub details: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            error: code.message().to_string(),
            details: details.into(),
        }
    }

    /// Map a failed pass to its response
    pub fn from_pass_error(err: &ReconcileError) -> Self {
        match err {
            ReconcileError::PassInProgress => Self::new(ErrorCode::PassInProgress, err.to_string()),
            other => Self::new(ErrorCode::PassAborted, other.to_string()),
        }
    }

    /// Map a failed inspection to its response
    pub fn from_inspection_error(err: &ReconcileError) -> Self {
        Self::new(ErrorCode::InspectionFailed, err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.code
            .map(|c| c.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
