//! Live document sessions with single-flight loading.
//!
//! One [`DocSession`] exists per active document and exclusively owns its
//! engine handle plus the clock/sequence counters. The cache loads sessions
//! lazily: the first `get` for a document performs the snapshot load and
//! counter reconstruction; concurrent callers racing on an uninitialized
//! document await that same in-flight load instead of building duplicate
//! engine instances.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell, RwLock};
use uuid::Uuid;

use crate::engine::ReplicatedDoc;
use crate::storage::{CollabStore, StoreError};

/// In-memory state for one active document.
pub struct DocSession {
    pub doc_id: Uuid,
    /// Engine handle, exclusively owned by this session.
    pub engine: ReplicatedDoc,
    /// Logical clock: strictly increasing per document, never reused while
    /// the session lives. Cold start = max persisted clock.
    pub clock: u64,
    /// Sequence number: separate counter, same rules.
    pub sequence: u64,
    /// Operations accepted since the last snapshot.
    pub ops_since_snapshot: u64,
    /// Timestamp of the last snapshot, if any (ms since epoch).
    pub last_snapshot_at: Option<u64>,
    /// Set when a persistence failure left the engine ahead of durable
    /// state. Cleared by a successful snapshot.
    pub divergent: bool,
}

/// Shared handle to a session; the mutex is the per-document critical
/// section (merge → order → dedup → append run under one hold).
pub type SessionHandle = Arc<Mutex<DocSession>>;

/// Owns `doc_id -> session` for all live documents.
pub struct SessionCache {
    store: Arc<CollabStore>,
    sessions: RwLock<HashMap<Uuid, Arc<OnceCell<SessionHandle>>>>,
}

impl SessionCache {
    pub fn new(store: Arc<CollabStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the live session for a document, loading it on first access.
    ///
    /// Loading applies the latest persisted snapshot (if any) to a fresh
    /// engine and reconstructs clock/sequence as the max persisted values
    /// from the operation log (0 if the log is empty). Concurrent first
    /// accesses are single-flighted through a per-document init cell.
    pub async fn get(&self, doc_id: Uuid) -> Result<SessionHandle, StoreError> {
        let cell = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(doc_id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let handle = cell
            .get_or_try_init(|| async { self.load(doc_id) })
            .await?;
        Ok(handle.clone())
    }

    /// Perform the actual load. Runs at most once per cache entry.
    fn load(&self, doc_id: Uuid) -> Result<SessionHandle, StoreError> {
        let record = self.store.load_document(doc_id)?;

        let engine = match &record.snapshot {
            Some(snapshot) => {
                ReplicatedDoc::from_state(&snapshot.state).map_err(|e| {
                    StoreError::Deserialization(format!(
                        "snapshot for {doc_id} is not applicable: {e}"
                    ))
                })?
            }
            None => ReplicatedDoc::new(),
        };

        let (clock, sequence) = self.store.last_clock_seq(doc_id)?.unwrap_or((0, 0));

        log::debug!(
            "Loaded session for doc {doc_id}: clock={clock} sequence={sequence} \
             snapshot={}",
            record.snapshot.is_some()
        );

        Ok(Arc::new(Mutex::new(DocSession {
            doc_id,
            engine,
            clock,
            sequence,
            ops_since_snapshot: record.ops_since_snapshot,
            last_snapshot_at: record.snapshot.as_ref().map(|s| s.taken_at),
            divergent: false,
        })))
    }

    /// Release a document's in-memory handle.
    ///
    /// Counters are not reset: the next `get` re-derives them from the
    /// persisted log, so clock values are never restarted at 1.
    pub async fn unload(&self, doc_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&doc_id).is_some();
        if removed {
            log::debug!("Unloaded session for doc {doc_id}");
        }
        removed
    }

    /// Whether a session is currently loaded.
    pub async fn is_loaded(&self, doc_id: Uuid) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(&doc_id)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Document ids with a loaded session.
    pub async fn loaded_docs(&self) -> Vec<Uuid> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of loaded sessions.
    pub async fn loaded_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|cell| cell.initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ms;
    use crate::storage::{DocumentRecord, StoreConfig};
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vellum_test_session_{name}_{}", Uuid::new_v4()))
    }

    fn open_cache(path: &std::path::Path) -> SessionCache {
        let store = Arc::new(CollabStore::open(StoreConfig::for_testing(path)).unwrap());
        SessionCache::new(store)
    }

    fn create_doc(cache: &SessionCache) -> Uuid {
        let doc_id = Uuid::new_v4();
        cache
            .store
            .create_document(&DocumentRecord::new(doc_id, Uuid::new_v4(), now_ms()))
            .unwrap();
        doc_id
    }

    #[tokio::test]
    async fn get_creates_empty_session() {
        let path = temp_path("empty");
        let cache = open_cache(&path);
        let doc_id = create_doc(&cache);

        let handle = cache.get(doc_id).await.unwrap();
        let session = handle.lock().await;
        assert_eq!(session.clock, 0);
        assert_eq!(session.sequence, 0);
        assert_eq!(session.engine.text(), "");
        assert!(!session.divergent);
        drop(session);

        assert!(cache.is_loaded(doc_id).await);
        assert_eq!(cache.loaded_count().await, 1);

        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn get_missing_document_fails() {
        let path = temp_path("missing");
        let cache = open_cache(&path);

        let err = cache.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn concurrent_first_access_single_flighted() {
        let path = temp_path("singleflight");
        let cache = Arc::new(open_cache(&path));
        let doc_id = create_doc(&cache);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(doc_id).await.unwrap() }));
        }

        let mut resolved = Vec::new();
        for handle in handles {
            resolved.push(handle.await.unwrap());
        }

        // Every caller got the same session instance.
        for other in &resolved[1..] {
            assert!(Arc::ptr_eq(&resolved[0], other));
        }
        assert_eq!(cache.loaded_count().await, 1);

        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn unload_releases_handle() {
        let path = temp_path("unload");
        let cache = open_cache(&path);
        let doc_id = create_doc(&cache);

        let _ = cache.get(doc_id).await.unwrap();
        assert!(cache.is_loaded(doc_id).await);

        assert!(cache.unload(doc_id).await);
        assert!(!cache.is_loaded(doc_id).await);
        assert!(!cache.unload(doc_id).await);

        let _ = std::fs::remove_dir_all(&path);
    }
}
