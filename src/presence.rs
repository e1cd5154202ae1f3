//! Per-document presence, cursors, and awareness.
//!
//! A user may hold several connections to the same document (two browser
//! tabs, phone + desktop). The user is present while any connection
//! remains; cursor and awareness are per user, last-write-wins across
//! their connections. When the last connection for a user drops, the
//! user's cursor and awareness go with the presence entry, and when the
//! last user leaves, the document's maps are removed entirely.
//!
//! Presence is ephemeral: nothing here is persisted, and this path is
//! fully independent of the edit critical section.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::now_ms;

/// A scalar awareness value. Awareness payloads are open maps of these —
/// anything richer is rejected at the boundary instead of passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AwarenessValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A user's cursor/selection range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub from: u64,
    pub to: u64,
    /// Stamped on every update (ms since epoch)
    pub updated_at: u64,
}

/// A user's awareness payload (selection mode, status, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Awareness {
    pub fields: HashMap<String, AwarenessValue>,
    /// Stamped on every update (ms since epoch)
    pub updated_at: u64,
}

/// One present user, as reported by [`PresenceTracker::get_presence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub connection_count: usize,
    pub cursor: Option<Cursor>,
    pub awareness: Option<Awareness>,
}

/// Presence state for one document.
#[derive(Default)]
struct DocPresence {
    /// user → live connection ids
    connections: HashMap<Uuid, HashSet<String>>,
    cursors: HashMap<Uuid, Cursor>,
    awareness: HashMap<Uuid, Awareness>,
}

/// Tracks who is active on which document.
pub struct PresenceTracker {
    docs: RwLock<HashMap<Uuid, DocPresence>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for a user on a document.
    pub async fn add_user(&self, doc_id: Uuid, user_id: Uuid, connection_id: &str) {
        let mut docs = self.docs.write().await;
        docs.entry(doc_id)
            .or_default()
            .connections
            .entry(user_id)
            .or_default()
            .insert(connection_id.to_string());
    }

    /// Remove a connection. Returns true when this was the user's last
    /// connection — the user's cursor and awareness are purged with it, and
    /// an emptied document is dropped entirely.
    pub async fn remove_user(&self, doc_id: Uuid, user_id: Uuid, connection_id: &str) -> bool {
        let mut docs = self.docs.write().await;
        let Some(doc) = docs.get_mut(&doc_id) else {
            return false;
        };

        let mut user_left = false;
        if let Some(connections) = doc.connections.get_mut(&user_id) {
            connections.remove(connection_id);
            if connections.is_empty() {
                doc.connections.remove(&user_id);
                doc.cursors.remove(&user_id);
                doc.awareness.remove(&user_id);
                user_left = true;
            }
        }

        if doc.connections.is_empty() {
            docs.remove(&doc_id);
        }
        user_left
    }

    /// Update a user's cursor. Last write wins regardless of which of the
    /// user's connections sent it.
    pub async fn update_cursor(&self, doc_id: Uuid, user_id: Uuid, from: u64, to: u64) {
        let mut docs = self.docs.write().await;
        docs.entry(doc_id).or_default().cursors.insert(
            user_id,
            Cursor {
                from,
                to,
                updated_at: now_ms(),
            },
        );
    }

    /// Update a user's awareness payload. Last write wins per user.
    pub async fn update_awareness(
        &self,
        doc_id: Uuid,
        user_id: Uuid,
        fields: HashMap<String, AwarenessValue>,
    ) {
        let mut docs = self.docs.write().await;
        docs.entry(doc_id).or_default().awareness.insert(
            user_id,
            Awareness {
                fields,
                updated_at: now_ms(),
            },
        );
    }

    /// Everyone present on a document, with their cursor/awareness.
    pub async fn get_presence(&self, doc_id: Uuid) -> Vec<PresenceEntry> {
        let docs = self.docs.read().await;
        let Some(doc) = docs.get(&doc_id) else {
            return Vec::new();
        };

        doc.connections
            .iter()
            .map(|(user_id, connections)| PresenceEntry {
                user_id: *user_id,
                connection_count: connections.len(),
                cursor: doc.cursors.get(user_id).cloned(),
                awareness: doc.awareness.get(user_id).cloned(),
            })
            .collect()
    }

    /// A user's live connection ids on a document.
    pub async fn user_connections(&self, doc_id: Uuid, user_id: Uuid) -> Vec<String> {
        let docs = self.docs.read().await;
        docs.get(&doc_id)
            .and_then(|doc| doc.connections.get(&user_id))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct users present on a document.
    pub async fn user_count(&self, doc_id: Uuid) -> usize {
        let docs = self.docs.read().await;
        docs.get(&doc_id).map(|doc| doc.connections.len()).unwrap_or(0)
    }

    /// Whether a user has at least one live connection on a document.
    pub async fn is_user_present(&self, doc_id: Uuid, user_id: Uuid) -> bool {
        let docs = self.docs.read().await;
        docs.get(&doc_id)
            .map(|doc| doc.connections.contains_key(&user_id))
            .unwrap_or(false)
    }

    /// Number of documents with any presence (diagnostics).
    pub async fn tracked_documents(&self) -> usize {
        self.docs.read().await.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_query() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;

        assert!(tracker.is_user_present(doc, user).await);
        assert_eq!(tracker.user_count(doc).await, 1);
        assert_eq!(tracker.user_connections(doc, user).await, vec!["conn-1"]);

        let presence = tracker.get_presence(doc).await;
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].user_id, user);
        assert_eq!(presence[0].connection_count, 1);
        assert!(presence[0].cursor.is_none());
        assert!(presence[0].awareness.is_none());
    }

    #[tokio::test]
    async fn second_connection_keeps_user_present() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;
        tracker.add_user(doc, user, "conn-2").await;

        // Removing one of two connections: still present.
        let left = tracker.remove_user(doc, user, "conn-1").await;
        assert!(!left);
        assert!(tracker.is_user_present(doc, user).await);
        let presence = tracker.get_presence(doc).await;
        assert_eq!(presence[0].connection_count, 1);
    }

    #[tokio::test]
    async fn last_connection_purges_cursor_and_awareness() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;
        tracker.update_cursor(doc, user, 3, 9).await;
        tracker
            .update_awareness(doc, user, HashMap::from([("status".to_string(), AwarenessValue::Text("typing".into()))]))
            .await;

        let left = tracker.remove_user(doc, user, "conn-1").await;
        assert!(left);
        assert!(!tracker.is_user_present(doc, user).await);
        assert!(tracker.get_presence(doc).await.is_empty());

        // Rejoining starts clean: no stale cursor or awareness.
        tracker.add_user(doc, user, "conn-3").await;
        let presence = tracker.get_presence(doc).await;
        assert!(presence[0].cursor.is_none());
        assert!(presence[0].awareness.is_none());
    }

    #[tokio::test]
    async fn last_user_drops_document_maps() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;
        assert_eq!(tracker.tracked_documents().await, 1);

        tracker.remove_user(doc, user, "conn-1").await;
        assert_eq!(tracker.tracked_documents().await, 0);
    }

    #[tokio::test]
    async fn cursor_lww_across_connections() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;
        tracker.add_user(doc, user, "conn-2").await;

        // Updates from different connections of the same user: last wins.
        tracker.update_cursor(doc, user, 1, 2).await;
        tracker.update_cursor(doc, user, 10, 20).await;

        let presence = tracker.get_presence(doc).await;
        let cursor = presence[0].cursor.as_ref().unwrap();
        assert_eq!((cursor.from, cursor.to), (10, 20));
        assert!(cursor.updated_at > 0);
    }

    #[tokio::test]
    async fn awareness_overwrites_whole_payload() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.add_user(doc, user, "conn-1").await;
        tracker
            .update_awareness(
                doc,
                user,
                HashMap::from([
                    ("status".to_string(), AwarenessValue::Text("typing".into())),
                    ("line".to_string(), AwarenessValue::Int(4)),
                ]),
            )
            .await;
        tracker
            .update_awareness(
                doc,
                user,
                HashMap::from([("idle".to_string(), AwarenessValue::Bool(true))]),
            )
            .await;

        let presence = tracker.get_presence(doc).await;
        let awareness = presence[0].awareness.as_ref().unwrap();
        assert_eq!(awareness.fields.len(), 1);
        assert_eq!(awareness.fields["idle"], AwarenessValue::Bool(true));
    }

    #[tokio::test]
    async fn unknown_document_queries_are_empty() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();

        assert!(tracker.get_presence(doc).await.is_empty());
        assert_eq!(tracker.user_count(doc).await, 0);
        assert!(!tracker.is_user_present(doc, Uuid::new_v4()).await);
        assert!(tracker.user_connections(doc, Uuid::new_v4()).await.is_empty());
        assert!(!tracker.remove_user(doc, Uuid::new_v4(), "conn-x").await);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let tracker = PresenceTracker::new();
        let doc = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        tracker.add_user(doc, alice, "a-1").await;
        tracker.add_user(doc, bob, "b-1").await;
        tracker.update_cursor(doc, alice, 0, 5).await;

        tracker.remove_user(doc, alice, "a-1").await;

        assert!(!tracker.is_user_present(doc, alice).await);
        assert!(tracker.is_user_present(doc, bob).await);
        assert_eq!(tracker.user_count(doc).await, 1);
    }
}
