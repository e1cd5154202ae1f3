//! Snapshot checkpoints and log pruning.
//!
//! Snapshots bound log-replay cost: reconstruction starts from the latest
//! checkpoint instead of the epoch. A snapshot is a pure read projection —
//! it never mutates the log and is never removed by compaction. No lock is
//! taken against concurrent writers, so a snapshot may trail in-flight
//! operations by a few entries; replay during reconstruction re-validates
//! it, so the staleness is harmless.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::SnapshotPolicy;
use crate::engine::ReplicatedDoc;
use crate::storage::{CollabStore, StoreError};

/// What a snapshot captured, for logging and stats.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub state_size: usize,
    pub content_len: usize,
    pub taken_at: u64,
}

/// Periodic checkpointing plus the two independent pruning paths.
pub struct SnapshotManager {
    store: Arc<CollabStore>,
    policy: SnapshotPolicy,
}

impl SnapshotManager {
    pub fn new(store: Arc<CollabStore>, policy: SnapshotPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Whether a snapshot is due for a session with the given counters.
    pub fn should_snapshot(&self, ops_since_snapshot: u64, last_snapshot_at: Option<u64>, now_ms: u64) -> bool {
        self.policy
            .should_snapshot(ops_since_snapshot, last_snapshot_at, now_ms)
    }

    /// Capture full engine state, its state vector, and the materialized
    /// text, and persist all three with the given timestamp. Resets the
    /// persisted ops-since-snapshot counter.
    pub fn create_snapshot(
        &self,
        doc_id: Uuid,
        engine: &ReplicatedDoc,
        now_ms: u64,
    ) -> Result<SnapshotInfo, StoreError> {
        let state = engine
            .state_as_update(None)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let state_vector = engine.state_vector();
        let content = engine.text();

        self.store
            .save_snapshot(doc_id, &state, &state_vector, &content, now_ms)?;

        Ok(SnapshotInfo {
            state_size: state.len(),
            content_len: content.len(),
            taken_at: now_ms,
        })
    }

    /// Delete a document's operations older than `keep_days` that are not
    /// flagged compacted. Returns the number deleted.
    ///
    /// Independent from — and in addition to — the unconditional retention
    /// expiry below; neither assumes the other has run.
    pub fn compact_operations(
        &self,
        doc_id: Uuid,
        keep_days: u32,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let cutoff = now_ms.saturating_sub(keep_days as u64 * 24 * 60 * 60 * 1000);
        let removed = self.store.compact_operations(doc_id, cutoff)?;
        log::info!("Compacted {removed} operations for doc {doc_id} (keep_days={keep_days})");
        Ok(removed)
    }

    /// Apply the fixed retention horizon to every record in the log,
    /// regardless of document or compacted flag.
    pub fn expire_operations(&self, now_ms: u64) -> Result<u64, StoreError> {
        let cutoff = now_ms.saturating_sub(self.policy.retention_ms());
        let removed = self.store.expire_operations(cutoff)?;
        if removed > 0 {
            log::info!(
                "Expired {removed} operations past the {}-day retention horizon",
                self.policy.retention_days
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ms;
    use crate::storage::{DocumentRecord, StoreConfig};
    use std::path::{Path, PathBuf};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vellum_test_snapshot_{name}_{}", Uuid::new_v4()))
    }

    fn open_manager(path: &Path) -> (Arc<CollabStore>, SnapshotManager) {
        let store = Arc::new(CollabStore::open(StoreConfig::for_testing(path)).unwrap());
        let manager = SnapshotManager::new(store.clone(), SnapshotPolicy::default());
        (store, manager)
    }

    #[test]
    fn snapshot_captures_state_and_text() {
        let path = temp_path("capture");
        let (store, manager) = open_manager(&path);

        let doc_id = Uuid::new_v4();
        store
            .create_document(&DocumentRecord::new(doc_id, Uuid::new_v4(), now_ms()))
            .unwrap();

        // Build some engine state from a sibling replica's update.
        let update = {
            use yrs::{Doc, ReadTxn, Text, Transact, WriteTxn};
            let doc = Doc::new();
            {
                let mut txn = doc.transact_mut();
                let text = txn.get_or_insert_text(crate::engine::TEXT_ROOT);
                text.insert(&mut txn, 0, "checkpoint me");
            }
            let txn = doc.transact();
            txn.encode_state_as_update_v1(&yrs::StateVector::default())
        };
        let engine = ReplicatedDoc::new();
        engine.merge(&update).unwrap();

        let info = manager.create_snapshot(doc_id, &engine, 5_000).unwrap();
        assert!(info.state_size > 0);
        assert_eq!(info.content_len, "checkpoint me".len());

        let record = store.load_document(doc_id).unwrap();
        let snapshot = record.snapshot.unwrap();
        assert_eq!(snapshot.content, "checkpoint me");
        assert_eq!(snapshot.taken_at, 5_000);

        // The snapshot state round-trips into a fresh engine.
        let restored = ReplicatedDoc::from_state(&snapshot.state).unwrap();
        assert_eq!(restored.text(), "checkpoint me");

        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn compaction_uses_keep_days_cutoff() {
        let path = temp_path("cutoff");
        let (store, manager) = open_manager(&path);

        let doc_id = Uuid::new_v4();
        store
            .create_document(&DocumentRecord::new(doc_id, Uuid::new_v4(), 0))
            .unwrap();

        let day_ms = 24 * 60 * 60 * 1000u64;
        let now = 10 * day_ms;
        for (clock, age_days) in [(1u64, 9u64), (2, 5), (3, 1)] {
            store
                .append_operation(&crate::storage::OperationRecord {
                    doc_id,
                    author: Uuid::new_v4(),
                    payload: vec![clock as u8],
                    clock,
                    sequence: clock,
                    hash: format!("h{clock}"),
                    client_id: "c".into(),
                    timestamp: now - age_days * day_ms,
                    size: 1,
                    compacted: false,
                    encoding: crate::storage::ENCODING_V1,
                })
                .unwrap();
        }

        // keep_days=7 drops only the 9-day-old record.
        let removed = manager.compact_operations(doc_id, 7, now).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.operation_count(doc_id).unwrap(), 2);

        let _ = std::fs::remove_dir_all(&path);
    }
}
