//! Murmur real-time session client
//!
//! Keeps one logical session alive across many physical WebSocket
//! connections:
//!
//! - [`machine`]: the `Disconnected -> Connecting -> Connected -> GivenUp`
//!   state machine and its attempt budget
//! - [`backoff`]: tuning and the capped exponential delay schedule
//! - [`connector`]: WebSocket connection and handshake rejection mapping
//! - [`manager`]: the background driver and its control handle
//! - [`backfill`]: REST re-fetch after every gap
//!
//! ```no_run
//! use std::sync::Arc;
//! use murmur_client::{
//!     HttpBackfill, MemoryCredentials, ReconnectConfig, ReconnectManager, SessionEvent, WsConnector,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Arc::new(MemoryCredentials::new("access-token"));
//! let backfill = HttpBackfill::new("https://api.example.com", ["/api/notifications"])?;
//! let (handle, mut events, _task) = ReconnectManager::new(
//!     Arc::new(WsConnector::new("wss://rt.example.com/ws")),
//!     credentials,
//!     ReconnectConfig::default(),
//! )
//! .with_resync(Arc::new(backfill))
//! .spawn();
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::LoginRequired(_) = event {
//!         handle.close();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod backoff;
pub mod connector;
pub mod credentials;
pub mod machine;
pub mod manager;

pub use backfill::{Backfill, BackfillError, HttpBackfill, Resync};
pub use backoff::{BackoffSchedule, ReconnectConfig};
pub use connector::{ConnectError, Connector, Inbound, Transport, WsConnector};
pub use credentials::{CredentialStore, MemoryCredentials};
pub use machine::{Failure, GiveUpReason, Indicator, Next, ReconnectMachine, SessionState};
pub use manager::{ManagerHandle, ReconnectManager, SessionEvent, SessionSnapshot};
