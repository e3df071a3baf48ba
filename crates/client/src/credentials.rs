//! Bearer credential source for the session

use std::sync::RwLock;

/// Supplies the current bearer token and receives the "force login" signal
///
/// The token is read again before every connection attempt, so a refresh
/// performed by the application is picked up by the next retry.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;

    /// The server rejected the credential for good; the application should
    /// send the user back to login.
    fn invalidate(&self);
}

/// In-memory credential slot
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replace the token, e.g. after a refresh
    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.into());
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    fn invalidate(&self) {
        if let Ok(mut slot) = self.token.write() {
            *slot = None;
        }
    }
}
