//! Error types surfaced over HTTP.
//!
//! Per-request generation failures never become an `ApiError` on the
//! admission path: they are stored in the request's status record and
//! delivered as terminal stream events. `ApiError` covers the cases where
//! a handler itself has to answer with a failure.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed admission request. Never enqueued.
    #[error("{0}")]
    Validation(String),

    /// Non-streaming caller gave up waiting.
    #[error("{0}")]
    Timeout(String),

    /// The downstream model server failed the request.
    #[error("{0}")]
    Downstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            ApiError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Downstream(_) => (StatusCode::BAD_GATEWAY, "server_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        }
    }
}

/// Bookkeeping failures inside the worker loop, as opposed to failures of
/// the completion call itself.
#[derive(Debug, Error)]
pub enum WorkerFault {
    #[error("request {0} has no status record")]
    UnknownRequest(String),

    #[error("request {0} is still processing")]
    AlreadyProcessing(String),
}

// OpenAI-style error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, kind: &str) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.to_string(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.error.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.parts();
        (status, Json(ErrorBody::new(self.to_string(), kind))).into_response()
    }
}

// Lookups answer unknown ids with a payload, not a failure status
pub fn not_found() -> Response {
    Json(serde_json::json!({ "error": "Request ID not found" })).into_response()
}
