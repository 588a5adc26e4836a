//! Translation of domain errors into HTTP responses.
//!
//! Library errors carry detail for logs. Responses carry only a stable error
//! code and, for server-side failures, a user-safe message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use workbench_access::{AuthenticationError, AuthorizationError};

/// Errors returned by API handlers and extractors.
#[derive(Debug)]
pub enum ApiError {
    /// A guard check failed.
    Authorization(AuthorizationError),
    /// Login or session handling failed.
    Authentication(AuthenticationError),
    /// The request body was rejected.
    InvalidRequest { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorization(err) => write!(f, "authorization failed: {}", err),
            Self::Authentication(err) => write!(f, "authentication failed: {}", err),
            Self::InvalidRequest { details } => write!(f, "invalid request: {}", details),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<AuthorizationError> for ApiError {
    fn from(err: AuthorizationError) -> Self {
        Self::Authorization(err)
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(err: AuthenticationError) -> Self {
        Self::Authentication(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Authorization(AuthorizationError::Unauthenticated) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthenticated" })),
            )
                .into_response(),
            // The missing permission stays in the logs.
            Self::Authorization(AuthorizationError::Forbidden { .. }) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden" })),
            )
                .into_response(),
            Self::Authentication(AuthenticationError::ProviderNotConfigured) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "provider_not_configured",
                    "message": "Sign-in is not available right now",
                })),
            )
                .into_response(),
            Self::Authentication(err) => {
                tracing::error!(kind = err.kind(), error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": err.kind(),
                        "message": "Internal server error",
                    })),
                )
                    .into_response()
            }
            Self::InvalidRequest { details } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_request", "message": details })),
            )
                .into_response(),
        }
    }
}
