//! Real-time channel events
//!
//! Defines the client-to-server and server-to-client frames exchanged on the
//! WebSocket channel. Business writes never travel client-to-server here;
//! the only client frame is the liveness ping.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::MurmurError;
use crate::types::{
    ChatMessage, ConversationSummary, DomainEvent, EventPayload, Identity, NotificationType,
    PostSummary, UserSummary,
};

/// Close code sent to a connection replaced by a newer one for the same identity
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Close code sent when the peer stopped answering keepalive pings
pub const CLOSE_KEEPALIVE_TIMEOUT: u16 = 4001;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Liveness ping, answered with `pong`
    Ping,
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, MurmurError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, MurmurError> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledged; the connection is registered and live
    Connected {
        session_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        connected_at: OffsetDateTime,
    },

    /// New direct message for the recipient
    NewMessage {
        event_id: Uuid,
        message: ChatMessage,
        conversation: ConversationSummary,
    },

    /// Like, comment, follow or mention
    Notification {
        event_id: Uuid,
        #[serde(rename = "type")]
        notification_type: NotificationType,
        sender: UserSummary,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        post: Option<PostSummary>,
    },

    /// A user came online or went offline
    PresenceUpdate { user_id: Identity, online: bool },

    /// Keepalive response
    Pong {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, MurmurError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, MurmurError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::PresenceUpdate { .. } => "presence_update",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

impl From<DomainEvent> for ServerEvent {
    fn from(event: DomainEvent) -> Self {
        match event.payload {
            EventPayload::Message(m) => ServerEvent::NewMessage {
                event_id: event.id,
                message: m.message,
                conversation: m.conversation,
            },
            EventPayload::Notification(n) => ServerEvent::Notification {
                event_id: event.id,
                notification_type: n.notification_type,
                sender: n.sender,
                post: n.post,
            },
        }
    }
}
