//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;
use crate::generation::error::{ErrorKind, GenerationError, Severity, classify};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Whether retrying the same request may succeed
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retryable: false,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            retryable: self.retryable,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

fn status_for(err: &GenerationError) -> StatusCode {
    match (err.severity, err.kind) {
        (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        (_, ErrorKind::DuplicateSubmission) => StatusCode::CONFLICT,
        (_, ErrorKind::TooManyActiveJobs) | (_, ErrorKind::RateLimited) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        (Severity::Validation, _) => StatusCode::UNPROCESSABLE_ENTITY,
        (Severity::Transient, _) => StatusCode::SERVICE_UNAVAILABLE,
        (Severity::Permanent, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        let status = status_for(&err);
        // Internal detail stays in the log.
        let message = if status.is_server_error() && err.is_permanent() {
            tracing::error!(kind = %err.kind, cause = ?err.cause, "Request failed: {}", err.message);
            "An unexpected error occurred".to_string()
        } else {
            err.message.clone()
        };

        let mut api = ApiError::new(status, err.kind.to_string().to_uppercase(), message);
        api.retryable = err.retryable;
        if !err.context.is_empty() && !status.is_server_error() {
            api.details = serde_json::to_value(&err.context).ok();
        }
        api
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                ApiError::internal("Service misconfigured")
            }
            other => classify(&other).into(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
