//! Notification Relay error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Notification Relay error type.
///
/// Maps to HTTP status codes:
/// - Unauthenticated: 403 Forbidden
/// - SessionsExhausted: 429 Too Many Requests
/// - HandshakeRejected: 403 Forbidden
/// - BadRequest: 400 Bad Request
/// - ServiceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RelayError {
    /// Credential missing or not resolvable to a user.
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Every session slot is outstanding.
    #[error("Too many concurrent sessions")]
    SessionsExhausted,

    /// Streaming handshake presented an unknown, expired or already-bound slot.
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Unauthenticated(_) | RelayError::HandshakeRejected(_) => 403,
            RelayError::SessionsExhausted => 429,
            RelayError::BadRequest(_) => 400,
            RelayError::ServiceUnavailable(_) => 503,
            RelayError::Internal(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RelayError::Unauthenticated(reason) => {
                (StatusCode::FORBIDDEN, "AUTHENTICATION_FAILED", reason.clone())
            }
            RelayError::SessionsExhausted => (
                StatusCode::TOO_MANY_REQUESTS,
                "TOO_MANY_SESSIONS",
                "Too many concurrent sessions. Please try again later.".to_string(),
            ),
            RelayError::HandshakeRejected(reason) => {
                (StatusCode::FORBIDDEN, "HANDSHAKE_REJECTED", reason.clone())
            }
            RelayError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            RelayError::ServiceUnavailable(reason) => {
                // Log actual reason server-side
                tracing::warn!(target: "relay.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            RelayError::Internal(reason) => {
                tracing::error!(target: "relay.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
