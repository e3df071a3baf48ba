//! Connection authentication
//!
//! Runs before a WebSocket upgrade is accepted. A pending connection is
//! either admitted with a resolved [`Identity`] or rejected with a specific
//! [`AuthErrorKind`]; there is no partial acceptance.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use futures::future::BoxFuture;
use murmur_shared::{AuthErrorKind, Identity};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::jwt::TokenVerifier;

/// Answers whether a verified subject is a known user
pub trait IdentityDirectory: Send + Sync {
    fn exists<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<bool, DirectoryError>>;
}

#[derive(Debug, thiserror::Error)]
#[error("Identity directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// Accepts every subject the token verifier accepts
#[derive(Debug, Default, Clone)]
pub struct OpenDirectory;

impl IdentityDirectory for OpenDirectory {
    fn exists<'a>(&'a self, _identity: &'a Identity) -> BoxFuture<'a, Result<bool, DirectoryError>> {
        Box::pin(async { Ok(true) })
    }
}

/// Fixed allow-list of identities
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    known: HashSet<Identity>,
}

impl StaticDirectory {
    pub fn new<I, T>(identities: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Identity>,
    {
        Self {
            known: identities.into_iter().map(Into::into).collect(),
        }
    }
}

impl IdentityDirectory for StaticDirectory {
    fn exists<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, Result<bool, DirectoryError>> {
        let found = self.known.contains(identity);
        Box::pin(async move { Ok(found) })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Connection rejected: {0}")]
    Rejected(AuthErrorKind),
    #[error("Handshake timed out")]
    TimedOut,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Pick the bearer token from the `Authorization` header, falling back to
/// the `token` query parameter.
pub fn extract_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
}

/// Admits or rejects pending connections
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    verifier: TokenVerifier,
    directory: Arc<dyn IdentityDirectory>,
    handshake_timeout: Duration,
}

impl ConnectionAuthenticator {
    pub fn new(
        verifier: TokenVerifier,
        directory: Arc<dyn IdentityDirectory>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            directory,
            handshake_timeout,
        }
    }

    /// Resolve the identity behind a presented token.
    ///
    /// The directory lookup runs under the handshake timeout; a pending
    /// connection that cannot be resolved in time is dropped as
    /// unauthenticated.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::Rejected(AuthErrorKind::MissingToken))?;

        let identity = self.verifier.verify(token).map_err(|e| {
            tracing::warn!(error = %e, "Connection token rejected");
            AuthError::Rejected(e.kind())
        })?;

        let exists = tokio::time::timeout(self.handshake_timeout, self.directory.exists(&identity))
            .await
            .map_err(|_| {
                tracing::warn!(user_id = %identity, "Identity lookup exceeded handshake timeout");
                AuthError::TimedOut
            })??;

        if !exists {
            tracing::warn!(user_id = %identity, "Connection rejected: user not found");
            return Err(AuthError::Rejected(AuthErrorKind::UnknownIdentity));
        }

        Ok(identity)
    }
}
