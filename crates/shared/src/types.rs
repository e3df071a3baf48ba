//! Common types used across Murmur

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// Opaque user identifier issued by the identity service.
///
/// Used as the key of the connection registry; never parsed or interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Domain Events
// =============================================================================

/// An event produced by the REST write path for real-time fan-out.
///
/// Immutable once built. The `id` lets clients de-duplicate when the same
/// event reaches them twice (reconnect race, or live delivery followed by
/// a REST backfill).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub recipient: Identity,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn notification(recipient: impl Into<Identity>, payload: NotificationPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            payload: EventPayload::Notification(payload),
        }
    }

    pub fn message(recipient: impl Into<Identity>, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            payload: EventPayload::Message(payload),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Notification(_) => EventKind::Notification,
            EventPayload::Message(_) => EventKind::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Notification,
    Message,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Notification => f.write_str("notification"),
            EventKind::Message => f.write_str("message"),
        }
    }
}

/// Closed set of event payloads, one fixed schema per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Notification(NotificationPayload),
    Message(MessagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub sender: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<PostSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Mention,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: ChatMessage,
    pub conversation: ConversationSummary,
}

/// Public profile fields carried alongside an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Identity,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Identity,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub participants: Vec<Identity>,
    #[serde(default)]
    pub unread_count: u32,
}
