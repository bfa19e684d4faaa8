//! Per-user notification rooms
//!
//! Each room (`user:<id>:<kind>`) owns a broadcast channel; only connections that
//! joined the room hold a receiver for it, so an emission can never reach another
//! user. Delivery is at-most-once: emissions to a room without members are dropped
//! and nothing is replayed to late joiners.

use grove_common::events::NotificationEvent;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Identifies one live client connection
pub type ConnectionId = Uuid;

/// Event as delivered to room members
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub room: String,
    pub event: NotificationEvent,
}

struct Room {
    tx: broadcast::Sender<RoomMessage>,
    members: HashSet<ConnectionId>,
}

/// Room registry shared by connections (membership) and pipelines (emission)
pub struct NotificationHub {
    rooms: RwLock<HashMap<String, Room>>,
    capacity: usize,
}

impl NotificationHub {
    /// `capacity` is the per-room buffer before slow receivers start lagging
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Add a connection to a room
    ///
    /// Returns a receiver for the room's events when the connection was not yet a
    /// member, `None` if it already was (join is idempotent).
    pub async fn join(
        &self,
        connection: ConnectionId,
        room: &str,
    ) -> Option<broadcast::Receiver<RoomMessage>> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.to_string()).or_insert_with(|| Room {
            tx: broadcast::channel(self.capacity).0,
            members: HashSet::new(),
        });

        if !entry.members.insert(connection) {
            return None;
        }

        tracing::debug!(room, %connection, members = entry.members.len(), "Joined room");
        Some(entry.tx.subscribe())
    }

    /// Remove a connection from a room; returns whether it was a member
    ///
    /// The caller drops the receiver it got from [`join`](Self::join). Empty rooms
    /// are discarded.
    pub async fn leave(&self, connection: ConnectionId, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return false;
        };

        let removed = entry.members.remove(&connection);
        if entry.members.is_empty() {
            rooms.remove(room);
        }
        if removed {
            tracing::debug!(room, %connection, "Left room");
        }
        removed
    }

    /// Remove a connection from every room it joined
    pub async fn disconnect(&self, connection: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, room| {
            room.members.remove(&connection);
            !room.members.is_empty()
        });
    }

    /// Send an event to one room; returns the number of receivers reached
    pub async fn emit(&self, room: &str, event: NotificationEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(entry) = rooms.get(room) else {
            tracing::trace!(room, event = event.event_type(), "No members, event dropped");
            return 0;
        };

        entry
            .tx
            .send(RoomMessage {
                room: room.to_string(),
                event,
            })
            .unwrap_or(0)
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.members.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
