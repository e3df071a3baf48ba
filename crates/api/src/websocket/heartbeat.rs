//! Heartbeat monitor
//!
//! Periodically scans the registry for connections with no traffic inside
//! the staleness threshold and logs them as suspect. It never disconnects
//! anything: transport keepalive in the connection handler is what closes
//! dead sockets.

use murmur_shared::Identity;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::registry::ConnectionRegistry;

/// A connection idle beyond the staleness threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleConnection {
    pub user_id: Identity,
    pub session_id: Uuid,
    pub idle: Duration,
    /// A newer connection has replaced this one but it never closed
    pub superseded: bool,
}

pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    stale_after: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, stale_after: Duration) -> Self {
        Self {
            registry,
            interval,
            stale_after,
        }
    }

    /// Run one scan against `now`
    pub fn scan(&self, now: OffsetDateTime) -> Vec<StaleConnection> {
        let mut stale = Vec::new();
        let mut scanned = 0usize;

        for (user_id, entry) in self.registry.all_entries() {
            for handle in entry.handles() {
                scanned += 1;
                let idle = handle.idle_for(now);
                if idle > self.stale_after {
                    tracing::warn!(
                        user_id = %user_id,
                        session_id = %handle.session_id,
                        idle_secs = idle.as_secs(),
                        superseded = handle.is_superseded(),
                        "Connection suspect: no activity within staleness threshold"
                    );
                    stale.push(StaleConnection {
                        user_id: user_id.clone(),
                        session_id: handle.session_id,
                        idle,
                        superseded: handle.is_superseded(),
                    });
                }
            }
        }

        tracing::debug!(scanned, stale = stale.len(), "Heartbeat scan complete");
        stale
    }

    /// Scan on a fixed interval until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            tracing::info!(
                interval_secs = self.interval.as_secs(),
                stale_after_secs = self.stale_after.as_secs(),
                "Heartbeat monitor started"
            );

            loop {
                ticker.tick().await;
                self.scan(OffsetDateTime::now_utc());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ConnectionHandle;
    use murmur_shared::ServerEvent;
    use tokio::sync::mpsc;

    fn connect(registry: &ConnectionRegistry, user: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel::<ServerEvent>();
        let handle = Arc::new(ConnectionHandle::new(Identity::from(user), tx));
        registry.add(Arc::clone(&handle));
        handle
    }

    fn monitor(registry: &Arc<ConnectionRegistry>) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            Arc::clone(registry),
            Duration::from_secs(300),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_fresh_connections_not_reported() {
        let registry = Arc::new(ConnectionRegistry::new());
        connect(&registry, "u1");
        assert!(monitor(&registry).scan(OffsetDateTime::now_utc()).is_empty());
    }

    #[test]
    fn test_idle_connection_reported() {
        let registry = Arc::new(ConnectionRegistry::new());
        let quiet = connect(&registry, "u1");
        let busy = connect(&registry, "u2");

        let now = OffsetDateTime::now_utc() + time::Duration::minutes(15);
        busy.touch_at(now);

        let stale = monitor(&registry).scan(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, quiet.session_id);
        assert!(stale[0].idle > Duration::from_secs(600));
        assert!(!stale[0].superseded);
    }

    #[test]
    fn test_lingering_superseded_handle_reported() {
        let registry = Arc::new(ConnectionRegistry::new());
        let old = connect(&registry, "u1");
        let new = connect(&registry, "u1");

        let now = OffsetDateTime::now_utc() + time::Duration::minutes(15);
        new.touch_at(now);

        let stale = monitor(&registry).scan(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, old.session_id);
        assert!(stale[0].superseded);
    }

    #[test]
    fn test_superseded_handle_scanned_after_replacement_leaves() {
        let registry = Arc::new(ConnectionRegistry::new());
        let old = connect(&registry, "u1");
        let new = connect(&registry, "u1");
        registry.remove(&new);

        let now = OffsetDateTime::now_utc() + time::Duration::minutes(15);
        let stale = monitor(&registry).scan(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, old.session_id);
        assert!(stale[0].superseded);
    }

    #[test]
    fn test_scan_does_not_evict() {
        let registry = Arc::new(ConnectionRegistry::new());
        connect(&registry, "u1");

        let now = OffsetDateTime::now_utc() + time::Duration::hours(2);
        assert_eq!(monitor(&registry).scan(now).len(), 1);
        assert!(registry.is_online(&Identity::from("u1")));
    }
}
