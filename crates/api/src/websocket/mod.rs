//! Real-time delivery over WebSocket
//!
//! Pushes notifications, chat messages and presence updates to connected
//! clients.
//!
//! # Architecture
//!
//! - **Connection**: one authenticated physical connection and its activity clock
//! - **Registry**: identity -> authoritative connection, the reachability source of truth
//! - **Dispatcher**: best-effort fan-out of domain events to live connections
//! - **Heartbeat**: periodic scan flagging connections with no recent traffic
//! - **Handler**: Axum route handler, keepalive and disconnect grace window

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod heartbeat;
pub mod registry;

pub use connection::ConnectionHandle;
pub use dispatcher::{DispatchReport, EventDispatcher, RealtimeGateway};
pub use handler::ws_handler;
pub use heartbeat::{HeartbeatMonitor, StaleConnection};
pub use registry::{AddOutcome, ConnectionRegistry, RegistryEntry, RemoveOutcome};
