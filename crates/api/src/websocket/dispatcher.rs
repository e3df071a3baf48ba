//! Event dispatcher
//!
//! Pushes domain events from the REST write path to the recipient's live
//! connection. Delivery is best-effort and at-most-once per connection:
//! offline recipients are a silent no-op and failed pushes are never
//! retried. The durable store behind the REST layer is the system of record.

use murmur_shared::{DomainEvent, Identity, MurmurError, ServerEvent};
use serde::Serialize;
use std::sync::Arc;

use super::registry::ConnectionRegistry;

/// Outcome of a single dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Connections the event was pushed to
    pub delivered: usize,
    /// Connections whose transport rejected the push
    pub failed: usize,
}

/// Collaborator surface used by the REST write handlers
pub trait RealtimeGateway: Send + Sync {
    /// Whether the recipient currently has a live connection
    fn is_online(&self, identity: &Identity) -> bool;

    /// Push an event to the recipient if reachable
    fn push(&self, event: DomainEvent) -> Result<DispatchReport, MurmurError>;
}

#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an event to every live connection of its recipient
    pub fn dispatch(&self, event: DomainEvent) -> Result<DispatchReport, MurmurError> {
        if event.recipient.is_empty() {
            return Err(MurmurError::InvalidEvent("recipient is empty".to_string()));
        }

        let recipient = event.recipient.clone();
        let event_id = event.id;
        let kind = event.kind();

        // Snapshot taken; no registry lock is held while sending
        let handles = self.registry.active_handles_for(&recipient);
        if handles.is_empty() {
            tracing::debug!(
                user_id = %recipient,
                event_id = %event_id,
                kind = %kind,
                "Recipient offline - event left for REST backfill"
            );
            return Ok(DispatchReport::default());
        }

        let server_event = ServerEvent::from(event);
        let mut report = DispatchReport::default();

        for handle in &handles {
            match handle.send(server_event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(
                        user_id = %recipient,
                        session_id = %handle.session_id,
                        event_id = %event_id,
                        "Failed to push event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            user_id = %recipient,
            event_id = %event_id,
            kind = %kind,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched event"
        );

        Ok(report)
    }

    /// Tell every other online user that `user_id` came online or went offline
    pub fn broadcast_presence(&self, user_id: &Identity, online: bool) -> usize {
        let event = ServerEvent::PresenceUpdate {
            user_id: user_id.clone(),
            online,
        };

        let mut sent = 0;
        for (identity, entry) in self.registry.all_entries() {
            if &identity == user_id {
                continue;
            }
            let Some(handle) = entry.authoritative else {
                continue;
            };
            if handle.send(event.clone()).is_ok() {
                sent += 1;
            }
        }

        tracing::debug!(
            user_id = %user_id,
            online,
            recipients = sent,
            "Broadcast presence update"
        );
        sent
    }
}

impl RealtimeGateway for EventDispatcher {
    fn is_online(&self, identity: &Identity) -> bool {
        self.registry.is_online(identity)
    }

    fn push(&self, event: DomainEvent) -> Result<DispatchReport, MurmurError> {
        self.dispatch(event)
    }
}
