//! Connection registry
//!
//! Maps each identity to its live connection(s) and is the single source of
//! truth for "is user X reachable". Exactly one handle per identity is
//! authoritative: the most recently added one. Older handles stay in the
//! entry as draining until their own connection task removes them.
//!
//! Entries are sharded by identity, so operations on different users never
//! contend on a global lock.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_shared::Identity;
use std::sync::Arc;

use super::connection::ConnectionHandle;

/// Live connections for one identity
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The only handle eligible for delivery; `None` once it has been
    /// removed while older handles are still draining
    pub authoritative: Option<Arc<ConnectionHandle>>,
    /// Superseded handles whose connections have not closed yet
    pub draining: Vec<Arc<ConnectionHandle>>,
}

impl RegistryEntry {
    fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            authoritative: Some(handle),
            draining: Vec::new(),
        }
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<ConnectionHandle>> {
        self.authoritative.iter().chain(self.draining.iter())
    }

    fn is_authoritative(&self, handle: &ConnectionHandle) -> bool {
        self.authoritative
            .as_ref()
            .is_some_and(|h| h.session_id == handle.session_id)
    }

    fn is_empty(&self) -> bool {
        self.authoritative.is_none() && self.draining.is_empty()
    }
}

/// Result of [`ConnectionRegistry::add`]
#[derive(Debug)]
pub struct AddOutcome {
    /// The identity had no authoritative handle before this add
    pub came_online: bool,
    /// Handle that was authoritative until this add
    pub superseded: Option<Arc<ConnectionHandle>>,
}

/// Result of [`ConnectionRegistry::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The authoritative handle was removed; the identity is now offline
    WentOffline,
    /// The handle had already been superseded; delivery is unaffected
    NotAuthoritative,
    /// The handle was not registered
    Unknown,
}

/// Registry of live connections keyed by identity
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<Identity, RegistryEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a handle as the authoritative connection for its identity.
    ///
    /// A previously authoritative handle is flagged as superseded but not
    /// closed here; its own connection task notices and shuts down.
    pub fn add(&self, handle: Arc<ConnectionHandle>) -> AddOutcome {
        let user_id = handle.user_id.clone();
        let session_id = handle.session_id;

        let outcome = match self.entries.entry(user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let previous = entry.authoritative.replace(handle);
                if let Some(previous) = &previous {
                    entry.draining.push(Arc::clone(previous));
                }
                AddOutcome {
                    came_online: previous.is_none(),
                    superseded: previous,
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry::new(handle));
                AddOutcome {
                    came_online: true,
                    superseded: None,
                }
            }
        };

        // Shard lock released above; waking the old task must not hold it
        if let Some(previous) = &outcome.superseded {
            previous.mark_superseded();
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                superseded_session_id = %previous.session_id,
                "Connection superseded by newer session"
            );
        } else {
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                "Connection added"
            );
        }

        outcome
    }

    /// Remove a handle.
    ///
    /// Removing a handle that is no longer authoritative never touches the
    /// authoritative one, so a slow-closing old connection cannot evict a
    /// freshly connected replacement. Draining handles outlive the removal
    /// of the authoritative one; the entry goes away with its last handle.
    pub fn remove(&self, handle: &ConnectionHandle) -> RemoveOutcome {
        let user_id = &handle.user_id;
        let session_id = handle.session_id;

        let outcome = match self.entries.get_mut(user_id) {
            Some(mut entry) if entry.is_authoritative(handle) => {
                entry.authoritative = None;
                RemoveOutcome::WentOffline
            }
            Some(mut entry) => match entry.draining.iter().position(|h| h.session_id == session_id) {
                Some(pos) => {
                    entry.draining.swap_remove(pos);
                    RemoveOutcome::NotAuthoritative
                }
                None => RemoveOutcome::Unknown,
            },
            None => RemoveOutcome::Unknown,
        };

        if outcome == RemoveOutcome::Unknown {
            return outcome;
        }

        // Re-checked under the shard lock; an add may have landed in between
        self.entries.remove_if(user_id, |_, entry| entry.is_empty());

        if outcome == RemoveOutcome::WentOffline {
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                "Connection removed"
            );
        } else {
            tracing::debug!(
                user_id = %user_id,
                session_id = %session_id,
                "Superseded connection released"
            );
        }
        outcome
    }

    /// Handles eligible for delivery to `identity`.
    ///
    /// The result is a snapshot; sends happen after the entry lock is
    /// released. At most one handle is returned.
    pub fn active_handles_for(&self, identity: &Identity) -> Vec<Arc<ConnectionHandle>> {
        self.entries
            .get(identity)
            .and_then(|entry| entry.authoritative.clone())
            .into_iter()
            .collect()
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|entry| entry.authoritative.is_some())
    }

    /// Record traffic on a handle. Returns whether it is still authoritative.
    pub fn touch(&self, handle: &ConnectionHandle) -> bool {
        handle.touch();
        self.entries
            .get(&handle.user_id)
            .is_some_and(|entry| entry.is_authoritative(handle))
    }

    /// Snapshot of every entry, each one consistent for its identity.
    /// Includes entries that only hold draining handles.
    pub fn all_entries(&self) -> Vec<(Identity, RegistryEntry)> {
        self.entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Number of online identities
    pub fn identity_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|r| r.value().authoritative.is_some())
            .count()
    }

    /// Number of handles, authoritative and draining
    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|r| r.value().handles().count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_shared::ServerEvent;
    use tokio::sync::mpsc;

    fn handle(user: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel::<ServerEvent>();
        Arc::new(ConnectionHandle::new(Identity::from(user), tx))
    }

    fn active_ids(registry: &ConnectionRegistry, user: &str) -> Vec<uuid::Uuid> {
        registry
            .active_handles_for(&Identity::from(user))
            .iter()
            .map(|h| h.session_id)
            .collect()
    }

    #[test]
    fn test_add_and_remove() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");

        let outcome = registry.add(Arc::clone(&h1));
        assert!(outcome.came_online);
        assert!(outcome.superseded.is_none());
        assert_eq!(active_ids(&registry, "u1"), vec![h1.session_id]);

        assert_eq!(registry.remove(&h1), RemoveOutcome::WentOffline);
        assert!(active_ids(&registry, "u1").is_empty());
        assert!(!registry.is_online(&Identity::from("u1")));
    }

    #[test]
    fn test_newer_handle_supersedes() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");

        registry.add(Arc::clone(&h1));
        let outcome = registry.add(Arc::clone(&h2));

        assert!(!outcome.came_online);
        assert_eq!(outcome.superseded.map(|h| h.session_id), Some(h1.session_id));
        assert!(h1.is_superseded());
        assert!(!h2.is_superseded());
        assert_eq!(active_ids(&registry, "u1"), vec![h2.session_id]);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_stale_remove_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");

        registry.add(Arc::clone(&h1));
        registry.add(Arc::clone(&h2));

        assert_eq!(registry.remove(&h1), RemoveOutcome::NotAuthoritative);
        assert_eq!(active_ids(&registry, "u1"), vec![h2.session_id]);
        assert_eq!(registry.connection_count(), 1);

        // Removing it again is a silent no-op too
        assert_eq!(registry.remove(&h1), RemoveOutcome::Unknown);
        assert_eq!(active_ids(&registry, "u1"), vec![h2.session_id]);
    }

    #[test]
    fn test_at_most_one_authoritative_after_any_add() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..8).map(|_| handle("u1")).collect();

        for (i, h) in handles.iter().enumerate() {
            registry.add(Arc::clone(h));
            assert_eq!(active_ids(&registry, "u1"), vec![h.session_id]);

            // Interleave removals of older handles
            if i >= 2 {
                registry.remove(&handles[i - 2]);
                assert_eq!(active_ids(&registry, "u1"), vec![h.session_id]);
            }
        }
    }

    #[test]
    fn test_identities_are_independent() {
        let registry = ConnectionRegistry::new();
        let a = handle("u1");
        let b = handle("u2");

        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));
        registry.remove(&a);

        assert!(!registry.is_online(&Identity::from("u1")));
        assert_eq!(active_ids(&registry, "u2"), vec![b.session_id]);
        assert_eq!(registry.identity_count(), 1);
    }

    #[test]
    fn test_touch_reports_authority() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");

        registry.add(Arc::clone(&h1));
        assert!(registry.touch(&h1));
        registry.add(Arc::clone(&h2));
        assert!(!registry.touch(&h1));
        assert!(registry.touch(&h2));
    }

    #[test]
    fn test_all_entries_includes_draining() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");
        registry.add(Arc::clone(&h1));
        registry.add(Arc::clone(&h2));
        registry.add(handle("u2"));

        let entries = registry.all_entries();
        assert_eq!(entries.len(), 2);
        let (_, u1) = entries
            .iter()
            .find(|(id, _)| id.as_str() == "u1")
            .unwrap();
        assert_eq!(u1.authoritative.as_ref().map(|h| h.session_id), Some(h2.session_id));
        assert_eq!(u1.handles().count(), 2);
    }

    #[test]
    fn test_draining_handle_outlives_authoritative_removal() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");
        registry.add(Arc::clone(&h1));
        registry.add(Arc::clone(&h2));

        // The replacement drops before the superseded connection has closed
        assert_eq!(registry.remove(&h2), RemoveOutcome::WentOffline);
        assert!(!registry.is_online(&Identity::from("u1")));
        assert!(active_ids(&registry, "u1").is_empty());
        assert_eq!(registry.identity_count(), 0);

        // The old handle is still tracked until its own removal
        let entries = registry.all_entries();
        assert_eq!(entries.len(), 1);
        let ids: Vec<_> = entries[0].1.handles().map(|h| h.session_id).collect();
        assert_eq!(ids, vec![h1.session_id]);
        assert_eq!(registry.connection_count(), 1);

        assert_eq!(registry.remove(&h1), RemoveOutcome::NotAuthoritative);
        assert!(registry.all_entries().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_add_after_authoritative_removal_comes_online() {
        let registry = ConnectionRegistry::new();
        let h1 = handle("u1");
        let h2 = handle("u1");
        registry.add(Arc::clone(&h1));
        registry.add(Arc::clone(&h2));
        registry.remove(&h2);

        let h3 = handle("u1");
        let outcome = registry.add(Arc::clone(&h3));
        assert!(outcome.came_online);
        assert!(outcome.superseded.is_none());
        assert_eq!(active_ids(&registry, "u1"), vec![h3.session_id]);
        assert_eq!(registry.connection_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconnect_races_leave_newest() {
        let registry = Arc::new(ConnectionRegistry::new());

        for _ in 0..50 {
            let old = handle("u1");
            registry.add(Arc::clone(&old));
            let new = handle("u1");

            let r1 = Arc::clone(&registry);
            let r2 = Arc::clone(&registry);
            let old_clone = Arc::clone(&old);
            let new_clone = Arc::clone(&new);

            // New connection registers while the old one is being torn down
            let add = tokio::spawn(async move { r1.add(new_clone) });
            let remove = tokio::spawn(async move { r2.remove(&old_clone) });
            add.await.unwrap();
            let removed = remove.await.unwrap();

            // Whichever ran first, the new handle must survive
            assert_eq!(active_ids(&registry, "u1"), vec![new.session_id]);
            if removed == RemoveOutcome::WentOffline {
                assert!(!old.is_superseded());
            }
            registry.remove(&new);
        }
    }
}
