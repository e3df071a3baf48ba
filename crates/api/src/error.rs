//! API error types and handling

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use murmur_shared::{AuthErrorKind, MurmurError, AUTH_ERROR_HEADER};
use serde_json::json;

use crate::auth::AuthError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("{0}")]
    Auth(AuthErrorKind),
    #[error("Authentication required")]
    Unauthorized,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Connection lifecycle
    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Auth(AuthErrorKind::MissingToken) => (StatusCode::UNAUTHORIZED, "MISSING_TOKEN"),
            ApiError::Auth(AuthErrorKind::MalformedToken) => (StatusCode::UNAUTHORIZED, "MALFORMED_TOKEN"),
            ApiError::Auth(AuthErrorKind::ExpiredToken) => (StatusCode::UNAUTHORIZED, "EXPIRED_TOKEN"),
            ApiError::Auth(AuthErrorKind::UnknownIdentity) => (StatusCode::UNAUTHORIZED, "UNKNOWN_IDENTITY"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::HandshakeTimeout => (StatusCode::SERVICE_UNAVAILABLE, "HANDSHAKE_TIMEOUT"),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = match &self {
            ApiError::Auth(kind) => json!({
                "error": {
                    "code": code,
                    "message": self.to_string(),
                    "retryable": kind.is_retryable(),
                }
            }),
            _ => json!({
                "error": {
                    "code": code,
                    "message": self.to_string(),
                }
            }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::Auth(kind) = &self {
            response
                .headers_mut()
                .insert(AUTH_ERROR_HEADER, HeaderValue::from_static(kind.as_str()));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected(kind) => ApiError::Auth(kind),
            AuthError::TimedOut => ApiError::HandshakeTimeout,
            AuthError::Directory(e) => {
                tracing::error!(error = %e, "Identity directory failure during handshake");
                ApiError::ServiceUnavailable
            }
        }
    }
}

impl From<MurmurError> for ApiError {
    fn from(err: MurmurError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
