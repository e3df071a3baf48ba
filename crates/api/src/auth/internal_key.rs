//! Shared-key guard for the internal collaborator routes
//!
//! The REST layer calls `/internal/*` from inside the trust boundary. When
//! `INTERNAL_API_KEY` is configured every call must present it in
//! [`INTERNAL_KEY_HEADER`].

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-api-key";

/// Middleware rejecting internal calls without the configured key
pub async fn require_internal_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.config.internal_api_key.as_deref() {
        if !key_matches(request.headers(), expected) {
            tracing::warn!(path = %request.uri().path(), "Internal route called without valid key");
            return Err(ApiError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

fn key_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|provided| constant_time_compare(provided, expected))
        .unwrap_or(false)
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    // Even when lengths differ, we do constant-time work to avoid leaking length
    if a.len() != b.len() {
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}
