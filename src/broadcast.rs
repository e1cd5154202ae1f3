//! Per-document fan-out of accepted events.
//!
//! This is the hand-off point to the (external) transport: the dispatcher
//! publishes encoded [`crate::commands::ServerEvent`]s here after
//! persistence succeeds, and the transport holds one receiver per
//! connection. Messages carry the originating connection id so the
//! transport can skip echoing to the sender. Publishing never blocks the
//! next edit for the document — the critical section is already released.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers; lagging
//! receivers drop oldest messages (backpressure) rather than stalling the
//! room.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// One fanned-out message.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    /// Connection that caused the event; the transport skips delivery back
    /// to it.
    pub origin: String,
    /// Encoded [`crate::commands::ServerEvent`].
    pub bytes: Vec<u8>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_connections: usize,
}

/// A broadcast group for a single document.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RoomMessage>>,
    /// Connection ids currently subscribed
    connections: RwLock<HashSet<String>>,
    capacity: usize,
    /// Lock-free on the publish path
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a group buffering up to `capacity` messages per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            connections: RwLock::new(HashSet::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe a connection; returns its receiver.
    pub async fn add_connection(&self, connection_id: &str) -> broadcast::Receiver<Arc<RoomMessage>> {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id.to_string());
        self.sender.subscribe()
    }

    /// Unsubscribe a connection (its receiver just gets dropped by the
    /// transport; this only updates bookkeeping).
    pub async fn remove_connection(&self, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id)
    }

    /// Publish a message to every subscriber. Returns the receiver count.
    pub fn publish(&self, message: Arc<RoomMessage>) -> usize {
        let count = self.sender.send(message).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Current connection count.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Broadcast statistics.
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_connections: self.connections.read().await.len(),
        }
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps document ids to broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<Uuid, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for a document.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&doc_id) {
                return room.clone();
            }
        }

        // Slow path: write lock, re-check after acquiring
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&doc_id) {
            return room.clone();
        }
        let room = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(doc_id, room.clone());
        room
    }

    /// Look up an existing group without creating one.
    pub async fn get(&self, doc_id: Uuid) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(&doc_id).cloned()
    }

    /// Remove a group with no remaining connections.
    pub async fn remove_if_empty(&self, doc_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&doc_id) {
            if room.connection_count().await == 0 {
                rooms.remove(&doc_id);
                return true;
            }
        }
        false
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
