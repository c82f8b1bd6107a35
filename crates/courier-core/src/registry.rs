//! Process-wide connection registry.
//!
//! The registry is the authoritative in-memory index from user id to the set
//! of currently-open connections, independent of the durable session store.
//! It is mutated by many connection tasks concurrently and backed by
//! lock-free maps; no operation can fail in a way that aborts message
//! delivery to other users.

use courier_protocol::Event;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{ConnectionId, UserId};

/// A live connection: the outbound queue for one authenticated device.
///
/// The handle is cheap to clone; every clone shares the same outbound
/// channel. Dropping the consuming side of the channel (the writer task)
/// makes the handle report not-open, which the registry and the fanout
/// router treat as the connection being dead.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// The user this connection authenticated as.
    pub user_id: UserId,
    /// Display name cached at authentication time.
    pub display_name: String,
    sender: mpsc::UnboundedSender<Event>,
}

impl ConnectionHandle {
    /// Create a handle with a freshly generated connection id.
    #[must_use]
    pub fn new(
        user_id: UserId,
        display_name: impl Into<String>,
        sender: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            display_name: display_name.into(),
            sender,
        }
    }

    /// Whether the transport behind this handle is still consuming events.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue an event for delivery on this connection.
    ///
    /// Returns false when the connection's writer has gone away; the caller
    /// logs and moves on, it never propagates the failure.
    pub fn emit(&self, event: Event) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of distinct users with at least one connection.
    pub users: usize,
}

/// The process-wide connection registry.
///
/// Constructed once per process and injected into the router and the
/// connect/disconnect handlers; never ambient global state.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Live connections per user; multi-device means the vec can hold many.
    by_user: DashMap<UserId, Vec<ConnectionHandle>>,
    /// Reverse index from connection id to owning user.
    owners: DashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a live connection. Multi-device is allowed: no precondition on
    /// prior state. The connection is visible to fanout decisions as soon as
    /// this returns.
    pub fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = handle.id.clone();
        let user_id = handle.user_id;

        self.owners.insert(id.clone(), user_id);
        self.by_user.entry(user_id).or_default().push(handle);

        debug!(
            connection = %id,
            user = %user_id,
            connections = self.by_user.get(&user_id).map(|v| v.len()).unwrap_or(0),
            "Connection registered"
        );

        id
    }

    /// Remove a connection. Idempotent: unregistering an absent id is a
    /// no-op. Returns the removed handle when one was present.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        let (_, user_id) = self.owners.remove(connection_id)?;

        let mut removed = None;
        let mut drop_user = false;

        if let Some(mut connections) = self.by_user.get_mut(&user_id) {
            if let Some(pos) = connections.iter().position(|h| h.id == *connection_id) {
                removed = Some(connections.remove(pos));
            }
            drop_user = connections.is_empty();
        }

        if drop_user {
            self.by_user.remove(&user_id);
        }

        debug!(connection = %connection_id, user = %user_id, "Connection unregistered");
        removed
    }

    /// Whether the connection is registered and its transport still open.
    #[must_use]
    pub fn is_live(&self, connection_id: &ConnectionId) -> bool {
        let Some(owner) = self.owners.get(connection_id) else {
            return false;
        };
        self.by_user
            .get(owner.value())
            .map(|conns| {
                conns
                    .iter()
                    .any(|h| h.id == *connection_id && h.is_open())
            })
            .unwrap_or(false)
    }

    /// Snapshot of the user's currently-registered connections; empty if
    /// none. Handles are clones, so a concurrent unregister cannot tear the
    /// snapshot.
    #[must_use]
    pub fn connections_for(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.by_user
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.owners.len(),
            users: self.by_user.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn handle_for(user: UserId) -> (ConnectionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(user, "Alice", tx), rx)
    }

    #[test]
    fn test_register_multi_device() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (h1, _rx1) = handle_for(user);
        let (h2, _rx2) = handle_for(user);
        registry.register(h1);
        registry.register(h2);

        assert_eq!(registry.connections_for(user).len(), 2);
        let stats = registry.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.users, 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (handle, _rx) = handle_for(user);
        let id = registry.register(handle);

        assert!(registry.unregister(&id).is_some());
        assert!(registry.unregister(&id).is_none());
        assert!(registry.connections_for(user).is_empty());
    }

    #[test]
    fn test_is_live_tracks_writer() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (handle, rx) = handle_for(user);
        let id = registry.register(handle);
        assert!(registry.is_live(&id));

        // Writer goes away without an explicit disconnect.
        drop(rx);
        assert!(!registry.is_live(&id));
    }

    #[test]
    fn test_is_live_unknown_connection() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_live(&ConnectionId::generate()));
    }

    #[tokio::test]
    async fn test_emit_reaches_connection() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (handle, mut rx) = handle_for(user);
        registry.register(handle);

        let snapshot = registry.connections_for(user);
        assert!(snapshot[0].emit(Event::error("test")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "error");
    }
}
