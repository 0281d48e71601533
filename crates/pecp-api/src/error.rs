//! # API Error Types
//!
//! Maps [`PlaneError`] to HTTP. Functional errors return their stable code
//! and message with a 4xx status. Technical errors return 500 with a generic
//! message and a trace id; the full detail goes to the server log under the
//! same trace id and never into the response body.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pecp_core::{codes, ErrorCategory, PlaneError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Message returned in place of any technical error.
pub const TECHNICAL_MESSAGE: &str = "A technical error occurred. Please contact support.";

/// Response header carrying the trace id of a technical error.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// The error being reported.
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable error code, e.g. `FUNC_003` or `TECH_001`.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Correlates a technical error with the server log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Domain error from the catalog or the build pipeline.
    #[error(transparent)]
    Plane(#[from] PlaneError),

    /// Request body could not be parsed or failed validation (400).
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Return the HTTP status code and stable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, codes::MALFORMED_REQUEST),
            Self::Plane(err) => {
                let status = match err.category() {
                    ErrorCategory::Technical => StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCategory::Functional if err.is_not_found() => StatusCode::NOT_FOUND,
                    ErrorCategory::Functional if err.is_conflict() => StatusCode::CONFLICT,
                    ErrorCategory::Functional => StatusCode::BAD_REQUEST,
                };
                (status, err.code())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if !status.is_server_error() {
            if matches!(&self, Self::Plane(e) if e.is_security()) {
                tracing::warn!(code, error = %self, "rejected request: security violation");
            }
            let body = ErrorBody {
                error: ErrorDetail {
                    code: code.to_string(),
                    message: match &self {
                        Self::Plane(e) => e.to_string(),
                        Self::BadRequest(m) => m.clone(),
                    },
                    trace_id: None,
                    details: None,
                },
            };
            return (status, Json(body)).into_response();
        }

        // Never expose technical detail to clients.
        let trace_id = Uuid::new_v4().to_string();
        let detail = match &self {
            Self::Plane(e) => e.detail().map(str::to_owned),
            Self::BadRequest(_) => None,
        };
        tracing::error!(%trace_id, code, error = %self, detail = ?detail, "technical error");

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: TECHNICAL_MESSAGE.to_string(),
                trace_id: Some(trace_id.clone()),
                details: None,
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, value);
        }
        response
    }
}
