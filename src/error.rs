// Error handling module
// Defines the gateway error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the OAuth refresh cycle itself.
///
/// `InvalidGrant` means the stored refresh token is permanently dead
/// (the provider rotates refresh tokens on every use); the only way out
/// is a new authorization-code exchange. `Network` is transient and may
/// be retried a bounded number of times.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// Token endpoint rejected the refresh token (HTTP 400/401)
    #[error("refresh token rejected by provider ({status}): {body}")]
    InvalidGrant { status: u16, body: String },

    /// Token endpoint unreachable or replied with a transient error
    #[error("token endpoint unreachable: {0}")]
    Network(String),
}

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Token store unreachable or misconfigured - fatal, never retried
    #[error("Token store error: {0}")]
    Storage(String),

    /// No credential has been stored yet - re-authorization required
    #[error("Not authorized: {0}")]
    NotConfigured(String),

    /// Token refresh cycle failed
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Provider or refresh call exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-auth error from the Fatture in Cloud API, surfaced verbatim
    #[error("Provider error: {status} - {body}")]
    Provider { status: u16, body: String },

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Storage(msg) => {
                tracing::error!("Token store failure: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
            }
            ApiError::NotConfigured(msg) => (StatusCode::UNAUTHORIZED, "not_configured", msg),
            ApiError::Refresh(err) => match err {
                RefreshError::InvalidGrant { .. } => (
                    StatusCode::UNAUTHORIZED,
                    "invalid_grant",
                    format!("{}. Please re-authorize the application.", err),
                ),
                RefreshError::Network(_) => (
                    StatusCode::BAD_GATEWAY,
                    "refresh_network_error",
                    err.to_string(),
                ),
            },
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
            ApiError::Provider { status, body } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, "provider_error", body)
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
