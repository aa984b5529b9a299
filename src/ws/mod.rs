pub mod actor;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;
use crate::UserId;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// One live transport session. A user can hold many of these at once
/// (multiple devices/tabs).
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub sender: ConnectionSender,
}

/// Tracks all active WebSocket connections per user and derives presence
/// from them: a user is online while they hold at least one connection.
/// One instance per process, shared through AppState.
pub struct ConnectionRegistry {
    inner: DashMap<UserId, Vec<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Add a connection. Returns true when it is the user's first — the
    /// caller broadcasts the online presence edge.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> bool {
        let mut connections = self.inner.entry(user_id).or_default();
        connections.push(handle);
        let first = connections.len() == 1;
        tracing::debug!(
            user_id,
            connections = connections.len(),
            "Connection registered"
        );
        first
    }

    /// Remove a connection (and any senders that already closed).
    /// Returns true when the user just went offline.
    pub fn deregister(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let mut went_offline = false;

        if let Some(mut connections) = self.inner.get_mut(&user_id) {
            connections.retain(|c| c.id != connection_id && !c.sender.is_closed());
            went_offline = connections.is_empty();
        }
        if went_offline {
            self.inner.remove(&user_id);
        }

        tracing::debug!(user_id, went_offline, "Connection unregistered");
        went_offline
    }

    /// Derived presence: online while at least one connection is held.
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner.get(&user_id).map_or(false, |c| !c.is_empty())
    }

    /// Snapshot of the user's current connections.
    pub fn handles_of(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.inner
            .get(&user_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Every user currently holding at least one connection.
    pub fn online_users(&self) -> Vec<UserId> {
        self.inner
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect()
    }

    /// Deliver an event to all of the user's connections. Silently a
    /// no-op when the user has none; a stale sender is never an error.
    pub fn send_to(&self, user_id: UserId, event: &ServerEvent) {
        let Some(msg) = event.to_message() else {
            return;
        };
        if let Some(connections) = self.inner.get(&user_id) {
            for handle in connections.iter() {
                let _ = handle.sender.send(msg.clone());
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
