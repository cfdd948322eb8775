//! Error types for raf-gateway
//!
//! Three layers:
//! - [`BackendError`]: what the scoring engine reported
//! - [`GatewayError`]: where in the request lifecycle it went wrong
//! - [`ApiError`]: how it is rendered over HTTP

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Failure reported by a scoring engine session
#[derive(Error, Debug)]
pub enum BackendError {
    /// Database connection, statement or transaction error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The routine returned something that is not a scalar result set
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// A batch insert wrote fewer rows than it was given
    #[error("Short write: expected {expected} rows, wrote {written}")]
    ShortWrite { expected: u64, written: u64 },

    /// The routine did not answer within the configured limit
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The engine could not be reached or refused the session
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

/// Request lifecycle errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed request, rejected before anything is staged
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Opening the scope, writing staged rows or committing failed
    #[error("Staging failed: {0}")]
    Staging(#[source] BackendError),

    /// The scoring routine failed, timed out or returned a malformed result
    #[error("Invocation failed: {0}")]
    Invocation(#[source] BackendError),

    /// Internal cache invariant violated
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// The retry budget ran out; carries the last failure
    #[error("Computation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Failures that warrant invalidating the cache and computing again
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Staging(_) | GatewayError::Invocation(_))
    }
}

/// HTTP-facing error
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body could not be parsed into a request
    #[error("{0}")]
    Validation(String),

    /// Body refused before it could be parsed (size limit, content type)
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let timestamp = raf_common::time::iso_timestamp();

        let message = match self {
            ApiError::Validation(msg) | ApiError::Gateway(GatewayError::Validation(msg)) => {
                let body = Json(json!({
                    "status": "error",
                    "message": "Validation failed",
                    "error": msg,
                    "timestamp": timestamp,
                }));
                return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
            }
            ApiError::Rejected { status, message } => {
                let body = Json(json!({
                    "status": "error",
                    "message": "Request rejected",
                    "error": message,
                    "timestamp": timestamp,
                }));
                return (status, body).into_response();
            }
            ApiError::Gateway(err) => err.to_string(),
        };

        let correlation_id = uuid::Uuid::new_v4();
        error!("[{}] Error: {}", correlation_id, message);

        let body = Json(json!({
            "status": "error",
            "message": "Internal server error",
            "error": message,
            "timestamp": timestamp,
            "correlation_id": correlation_id.to_string(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
