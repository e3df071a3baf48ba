//! Error types for Murmur

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MurmurError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}
