//! Shared application state

use std::sync::Arc;

use crate::auth::{
    ConnectionAuthenticator, IdentityDirectory, OpenDirectory, StaticDirectory, TokenVerifier,
};
use crate::config::Config;
use crate::websocket::{ConnectionRegistry, EventDispatcher, HeartbeatMonitor};

/// State shared by every route and connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authenticator: ConnectionAuthenticator,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: EventDispatcher,
}

impl AppState {
    /// Build state with the identity directory implied by the config
    pub fn new(config: Config) -> Self {
        let directory: Arc<dyn IdentityDirectory> = match &config.known_identities {
            Some(known) => Arc::new(StaticDirectory::new(known.iter().cloned())),
            None => Arc::new(OpenDirectory),
        };
        Self::with_directory(config, directory)
    }

    pub fn with_directory(config: Config, directory: Arc<dyn IdentityDirectory>) -> Self {
        let verifier = TokenVerifier::new(&config.jwt_secret, config.jwt_leeway_secs);
        let authenticator =
            ConnectionAuthenticator::new(verifier, directory, config.handshake_timeout());
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));

        Self {
            config: Arc::new(config),
            authenticator,
            registry,
            dispatcher,
        }
    }

    pub fn heartbeat_monitor(&self) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            Arc::clone(&self.registry),
            self.config.heartbeat_interval(),
            self.config.heartbeat_stale_after(),
        )
    }
}
