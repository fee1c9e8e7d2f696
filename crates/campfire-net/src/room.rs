//! Room table and subscriptions.
//!
//! Every room owns a broadcast channel. Publishing never waits on
//! subscribers: a subscriber that falls behind sees `Lagged` and skips ahead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use campfire_core::{IdentityHash, RoomId};

use crate::message::MessageContent;

/// A message delivered to room subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub room: RoomId,
    pub sender: IdentityHash,
    pub sender_name: String,
    pub content: MessageContent,
    /// Whether the message was addressed to this identity alone.
    pub direct: bool,
}

/// One chat room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    events: broadcast::Sender<MessageEvent>,
}

impl Room {
    fn new(id: RoomId, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { id, events }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.events.subscribe()
    }

    /// Hand an event to current subscribers. Returns how many received it.
    pub fn publish(&self, event: MessageEvent) -> usize {
        // No subscribers is not an error.
        self.events.send(event).unwrap_or(0)
    }
}

/// All rooms this node knows about, keyed by id.
#[derive(Debug)]
pub struct RoomTable {
    capacity: usize,
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl RoomTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, id: RoomId) -> Arc<Room> {
        if let Some(room) = self.try_lookup(&id) {
            return room;
        }
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            rooms
                .entry(id)
                .or_insert_with(|| Arc::new(Room::new(id, self.capacity))),
        )
    }

    pub fn try_lookup(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Ids of every known room, in no particular order.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Publish to a room, creating it so later subscribers can find it.
    pub fn publish(&self, event: MessageEvent) -> usize {
        self.get_or_create(event.room).publish(event)
    }
}
