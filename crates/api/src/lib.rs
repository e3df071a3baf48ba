//! Murmur API Library
//!
//! Real-time delivery server: authenticates persistent connections, tracks
//! which users are reachable and pushes domain events to them.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
