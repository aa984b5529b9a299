//! Topic-based publish/subscribe fan-out over live connections.
//!
//! Generic: chat delivery and match broadcasts both ride on it, and it
//! carries no domain knowledge. Membership is per-connection and does not
//! survive a reconnect — the connect-time gateway re-subscribes.

use std::collections::HashMap;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionRegistry, ConnectionSender};
use crate::UserId;

/// The global presence topic every connection joins at handshake time.
pub const EVERYONE_TOPIC: &str = "everyone";

pub struct RoomBroker {
    topics: DashMap<String, HashMap<Uuid, ConnectionSender>>,
}

impl RoomBroker {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Subscribe all *current* connections of a user to a topic.
    /// Connections opened later must be re-subscribed explicitly.
    pub fn subscribe(&self, registry: &ConnectionRegistry, user_id: UserId, topic: &str) {
        for handle in registry.handles_of(user_id) {
            self.subscribe_connection(topic, &handle);
        }
    }

    /// Subscribe a single connection to a topic.
    pub fn subscribe_connection(&self, topic: &str, handle: &ConnectionHandle) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(handle.id, handle.sender.clone());
    }

    /// Fan an event out to every connection currently in the topic.
    /// Closed senders are pruned as they are encountered.
    pub fn publish(&self, topic: &str, event: &ServerEvent) {
        let Some(msg) = event.to_message() else {
            return;
        };
        if let Some(mut members) = self.topics.get_mut(topic) {
            members.retain(|_, sender| sender.send(msg.clone()).is_ok());
        }
    }

    /// Remove a closed connection from every topic.
    pub fn drop_connection(&self, connection_id: Uuid) {
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(&connection_id);
        }
        self.topics.retain(|_, members| !members.is_empty());
    }

    pub fn member_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |m| m.len())
    }
}

impl Default for RoomBroker {
    fn default() -> Self {
        Self::new()
    }
}
