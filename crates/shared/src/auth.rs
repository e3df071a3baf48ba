//! Authentication failure taxonomy shared by server and client
//!
//! The server rejects a handshake before upgrading, so a WebSocket client
//! only ever sees the HTTP response. The category travels in the
//! [`AUTH_ERROR_HEADER`] header and in the JSON error body.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Response header carrying the machine-readable rejection category
pub const AUTH_ERROR_HEADER: &str = "x-murmur-auth-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Malformed token")]
    MalformedToken,
    #[error("Token has expired")]
    ExpiredToken,
    #[error("Unknown identity")]
    UnknownIdentity,
}

/// What the client must do before trying again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Refresh the credential and retry
    RefreshAndRetry,
    /// Ask the user to log in again
    Reauthenticate,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingToken => "missing_token",
            AuthErrorKind::MalformedToken => "malformed_token",
            AuthErrorKind::ExpiredToken => "expired_token",
            AuthErrorKind::UnknownIdentity => "unknown_identity",
        }
    }

    /// Only an expired token can succeed on a later attempt, once the
    /// credential has been refreshed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthErrorKind::ExpiredToken)
    }

    pub fn remedy(&self) -> Remedy {
        if self.is_retryable() {
            Remedy::RefreshAndRetry
        } else {
            Remedy::Reauthenticate
        }
    }
}

impl FromStr for AuthErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "missing_token" => Ok(AuthErrorKind::MissingToken),
            "malformed_token" => Ok(AuthErrorKind::MalformedToken),
            "expired_token" => Ok(AuthErrorKind::ExpiredToken),
            "unknown_identity" => Ok(AuthErrorKind::UnknownIdentity),
            _ => Err(()),
        }
    }
}
