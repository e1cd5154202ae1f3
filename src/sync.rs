//! The apply-update critical section and sync read paths.
//!
//! All operations that read-then-write a session's engine, clock, and
//! sequence (merge → assign order → dedup-check → append) run under one
//! hold of the session mutex, strictly in arrival order. This head-of-line
//! blocking is deliberate: it is what makes the clock monotonic and the
//! duplicate check correct. Documents never share a lock, so edits to
//! different documents proceed fully in parallel. Broadcasting happens
//! after the mutex is released, in the dispatch layer.

use std::sync::Arc;

use uuid::Uuid;

use crate::access::{self, Role};
use crate::engine::MergeError;
use crate::now_ms;
use crate::session::SessionCache;
use crate::snapshot::SnapshotManager;
use crate::storage::{AppendOutcome, CollabStore, OperationRecord, StoreError, ENCODING_V1};

/// Sync errors. `duplicate` is not among them — a rejected duplicate is a
/// successful outcome, see [`ApplyOutcome`].
#[derive(Debug)]
pub enum SyncError {
    /// Document does not exist
    NotFound(Uuid),
    /// Caller's role is below the required threshold
    AccessDenied { required: Role },
    /// Engine rejected the payload; fatal for this request, never
    /// retryable with the same bytes
    Merge(MergeError),
    /// Store failed; retryable infrastructure error. When it follows a
    /// successful merge the session is flagged divergent — the in-memory
    /// engine is ahead of durable state and a fresh snapshot is the
    /// remediation, never an automatic retry.
    Persistence(StoreError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound(id) => write!(f, "Document not found: {id}"),
            SyncError::AccessDenied { required } => write!(f, "Access denied: requires {required}"),
            SyncError::Merge(e) => write!(f, "Merge failure: {e}"),
            SyncError::Persistence(e) => write!(f, "Persistence failure: {e}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SyncError::NotFound(id),
            other => SyncError::Persistence(other),
        }
    }
}

/// Result of an accepted (or deduplicated) update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// True when the content hash was already in the log: nothing was
    /// written and nothing should be broadcast. The clock/sequence values
    /// were still consumed — holes in the log are expected and preserved.
    pub duplicate: bool,
    pub clock: u64,
    pub sequence: u64,
    /// Content hash of the stored record; absent for duplicates.
    pub hash: Option<String>,
}

/// Content hash over `payload ∥ author ∥ client_id ∥ clock`.
///
/// Globally unique across the operation log; a repeat is rejected as a
/// duplicate rather than stored twice.
pub fn operation_hash(payload: &[u8], author: Uuid, client_id: &str, clock: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(payload);
    hasher.update(author.as_bytes());
    hasher.update(client_id.as_bytes());
    hasher.update(&clock.to_be_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Orchestrates the end-to-end handling of incoming edits.
pub struct SyncCoordinator {
    store: Arc<CollabStore>,
    sessions: Arc<SessionCache>,
    snapshots: SnapshotManager,
}

impl SyncCoordinator {
    pub fn new(store: Arc<CollabStore>, sessions: Arc<SessionCache>, snapshots: SnapshotManager) -> Self {
        Self {
            store,
            sessions,
            snapshots,
        }
    }

    /// Apply an incoming edit.
    ///
    /// Access check → unconditional engine merge (merging stale or
    /// duplicate payloads is safe, the engine is idempotent) → server-side
    /// clock/sequence assignment (client ordering hints are ignored) →
    /// dedup → durable append → snapshot policy. Returns what the caller
    /// needs to acknowledge and, for non-duplicates, broadcast.
    pub async fn apply_update(
        &self,
        doc_id: Uuid,
        payload: &[u8],
        author: Uuid,
        client_id: &str,
    ) -> Result<ApplyOutcome, SyncError> {
        let record = self.store.load_document(doc_id)?;
        if !access::has_access(&record, Some(author), Role::Editor) {
            return Err(SyncError::AccessDenied {
                required: Role::Editor,
            });
        }

        let handle = self.sessions.get(doc_id).await?;
        let mut session = handle.lock().await;

        session.engine.merge(payload).map_err(|e| {
            log::error!("Merge failed for doc {doc_id} from {client_id}: {e}");
            SyncError::Merge(e)
        })?;

        session.clock += 1;
        session.sequence += 1;
        let clock = session.clock;
        let sequence = session.sequence;

        let hash = operation_hash(payload, author, client_id, clock);
        if self.store.contains_hash(&hash)? {
            log::warn!("Duplicate operation on doc {doc_id}: hash={hash} client={client_id}");
            return Ok(ApplyOutcome {
                duplicate: true,
                clock,
                sequence,
                hash: None,
            });
        }

        let timestamp = now_ms();
        let op = OperationRecord {
            doc_id,
            author,
            payload: payload.to_vec(),
            clock,
            sequence,
            hash: hash.clone(),
            client_id: client_id.to_string(),
            timestamp,
            size: payload.len() as u32,
            compacted: false,
            encoding: ENCODING_V1,
        };

        match self.store.append_operation(&op) {
            Ok(AppendOutcome::Appended) => {}
            Ok(AppendOutcome::Duplicate) => {
                // Hash landed between our check and the write.
                return Ok(ApplyOutcome {
                    duplicate: true,
                    clock,
                    sequence,
                    hash: None,
                });
            }
            Err(e) => {
                // The merge already happened and cannot be undone; the
                // engine is now ahead of durable state. Flag it and let the
                // caller drive recovery (full resync from a fresh snapshot).
                session.divergent = true;
                log::error!("Failed to persist operation for doc {doc_id}: {e}");
                return Err(SyncError::Persistence(e));
            }
        }

        session.ops_since_snapshot += 1;
        log::debug!(
            "Applied update to doc {doc_id}: clock={clock} sequence={sequence} size={}",
            op.size
        );

        // Snapshot policy is evaluated after the triggering operation is
        // durable, never before.
        if self
            .snapshots
            .should_snapshot(session.ops_since_snapshot, session.last_snapshot_at, timestamp)
        {
            match self.snapshots.create_snapshot(doc_id, &session.engine, timestamp) {
                Ok(info) => {
                    session.ops_since_snapshot = 0;
                    session.last_snapshot_at = Some(timestamp);
                    session.divergent = false;
                    log::info!(
                        "Snapshot for doc {doc_id}: state={}B content={} chars",
                        info.state_size,
                        info.content_len
                    );
                }
                Err(e) => {
                    // The operation itself is durable; a failed checkpoint
                    // only delays compaction.
                    log::error!("Snapshot failed for doc {doc_id}: {e}");
                }
            }
        }

        Ok(ApplyOutcome {
            duplicate: false,
            clock,
            sequence,
            hash: Some(hash),
        })
    }

    /// Encode the live document's state vector.
    pub async fn state_vector(&self, doc_id: Uuid) -> Result<Vec<u8>, SyncError> {
        let handle = self.sessions.get(doc_id).await?;
        let session = handle.lock().await;
        Ok(session.engine.state_vector())
    }

    /// Encode live state as an update, optionally as a diff against a
    /// remote state vector.
    pub async fn state_as_update(
        &self,
        doc_id: Uuid,
        state_vector: Option<&[u8]>,
    ) -> Result<Vec<u8>, SyncError> {
        let handle = self.sessions.get(doc_id).await?;
        let session = handle.lock().await;
        session
            .engine
            .state_as_update(state_vector)
            .map_err(SyncError::Merge)
    }

    /// Materialize the live document text.
    pub async fn content(&self, doc_id: Uuid) -> Result<String, SyncError> {
        let handle = self.sessions.get(doc_id).await?;
        let session = handle.lock().await;
        Ok(session.engine.text())
    }

    /// Take a snapshot of the live session now.
    ///
    /// Also the remediation path after a persistence failure: on success
    /// durable state matches the engine again and the divergent flag clears.
    pub async fn create_snapshot(&self, doc_id: Uuid) -> Result<(), SyncError> {
        let handle = self.sessions.get(doc_id).await?;
        let mut session = handle.lock().await;
        let now = now_ms();
        self.snapshots
            .create_snapshot(doc_id, &session.engine, now)
            .map_err(SyncError::Persistence)?;
        session.ops_since_snapshot = 0;
        session.last_snapshot_at = Some(now);
        session.divergent = false;
        Ok(())
    }

    /// Whether the live session is ahead of durable state.
    pub async fn is_divergent(&self, doc_id: Uuid) -> Result<bool, SyncError> {
        let handle = self.sessions.get(doc_id).await?;
        let session = handle.lock().await;
        Ok(session.divergent)
    }
}
