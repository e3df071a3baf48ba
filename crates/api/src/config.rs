//! Application configuration

use murmur_shared::Identity;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Authentication
    pub jwt_secret: String,
    pub jwt_leeway_secs: u64,
    pub internal_api_key: Option<String>,
    pub known_identities: Option<Vec<Identity>>,

    // Connection lifecycle
    pub handshake_timeout_ms: u64,
    pub ping_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub disconnect_grace_ms: u64,

    // Heartbeat monitor
    pub heartbeat_interval_secs: u64,
    pub heartbeat_stale_after_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_leeway_secs: parse_or("JWT_LEEWAY_SECS", 60)?,
            internal_api_key: match env::var("INTERNAL_API_KEY") {
                Ok(key) if key.is_empty() => None,
                Ok(key) if key.len() < 32 => {
                    return Err(ConfigError::WeakSecret(
                        "INTERNAL_API_KEY must be at least 32 characters",
                    ))
                }
                Ok(key) => Some(key),
                Err(_) => None,
            },
            known_identities: env::var("KNOWN_IDENTITIES").ok().map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(Identity::from)
                    .collect()
            }),

            // Connection lifecycle
            handshake_timeout_ms: parse_or("HANDSHAKE_TIMEOUT_MS", 5000)?,
            ping_interval_secs: parse_or("PING_INTERVAL_SECS", 25)?,
            keepalive_timeout_secs: parse_or("KEEPALIVE_TIMEOUT_SECS", 60)?,
            disconnect_grace_ms: parse_or("DISCONNECT_GRACE_MS", 5000)?,

            // Heartbeat monitor
            heartbeat_interval_secs: parse_or("HEARTBEAT_INTERVAL_SECS", 300)?,
            heartbeat_stale_after_secs: parse_or("HEARTBEAT_STALE_AFTER_SECS", 600)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check relationships between values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("PING_INTERVAL_SECS must be positive"));
        }
        if self.keepalive_timeout_secs <= self.ping_interval_secs {
            return Err(ConfigError::Invalid(
                "KEEPALIVE_TIMEOUT_SECS must exceed PING_INTERVAL_SECS",
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid("HEARTBEAT_INTERVAL_SECS must be positive"));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_stale_after(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_after_secs)
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparsable(key)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Could not parse environment variable: {0}")]
    Unparsable(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
