//! Murmur Shared Types
//!
//! Identity, domain events and the real-time channel protocol shared by the
//! Murmur server and its clients.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod types;

pub use auth::{AuthErrorKind, Remedy, AUTH_ERROR_HEADER};
pub use error::*;
pub use protocol::{ClientEvent, ServerEvent, CLOSE_KEEPALIVE_TIMEOUT, CLOSE_SUPERSEDED};
pub use types::*;
