//! WebSocket connection handles
//!
//! A [`ConnectionHandle`] represents one physical, authenticated connection.
//! The registry owns it while it is live; the connection task keeps its own
//! reference so it can observe supersession and close itself.

use murmur_shared::{Identity, ServerEvent};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Authenticated user; fixed for the lifetime of the connection
    pub user_id: Identity,

    pub connected_at: OffsetDateTime,

    /// Channel to send events to this connection's writer task
    sender: mpsc::UnboundedSender<ServerEvent>,

    /// Unix milliseconds of the last inbound or outbound traffic
    last_activity_ms: AtomicI64,

    superseded: AtomicBool,
    superseded_notify: Notify,
}

impl ConnectionHandle {
    /// Create a new connection
    pub fn new(user_id: Identity, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        let connected_at = OffsetDateTime::now_utc();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            connected_at,
            sender,
            last_activity_ms: AtomicI64::new(unix_millis(connected_at)),
            superseded: AtomicBool::new(false),
            superseded_notify: Notify::new(),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Err if the connection's writer has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)?;
        self.touch();
        Ok(())
    }

    /// Record traffic now
    pub fn touch(&self) {
        self.touch_at(OffsetDateTime::now_utc());
    }

    /// Record traffic at `at`; never moves the timestamp backwards
    pub fn touch_at(&self, at: OffsetDateTime) {
        self.last_activity_ms
            .fetch_max(unix_millis(at), Ordering::AcqRel);
    }

    pub fn last_activity_at(&self) -> OffsetDateTime {
        let ms = self.last_activity_ms.load(Ordering::Acquire);
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
            .unwrap_or(self.connected_at)
    }

    /// Time since the last recorded traffic, zero if `now` is earlier
    pub fn idle_for(&self, now: OffsetDateTime) -> Duration {
        let idle = unix_millis(now) - self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(u64::try_from(idle).unwrap_or(0))
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    /// Flag the handle as replaced. Called by the registry only.
    pub(crate) fn mark_superseded(&self) {
        self.superseded.store(true, Ordering::Release);
        self.superseded_notify.notify_waiters();
    }

    /// Resolves once a newer connection for the same user has replaced this one
    pub async fn superseded(&self) {
        loop {
            let notified = self.superseded_notify.notified();
            if self.is_superseded() {
                return;
            }
            notified.await;
        }
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
