//! Engine configuration.
//!
//! Plain structs with `Default` implementations; no environment parsing —
//! the embedding service decides where values come from.

use std::path::PathBuf;

use crate::storage::StoreConfig;

/// Snapshot and retention policy for a document's operation log.
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    /// Take a snapshot once this many operations accumulated since the last one.
    pub min_ops: u64,
    /// Take a snapshot once this much time elapsed since the last one.
    pub interval_ms: u64,
    /// Unconditional retention horizon for operation records, in days.
    pub retention_days: u32,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            min_ops: 100,
            interval_ms: 300_000, // 5 minutes
            retention_days: 30,
        }
    }
}

impl SnapshotPolicy {
    /// Whether a snapshot is due.
    ///
    /// A document that has never been snapshotted is treated as infinitely
    /// stale, so its first accepted operation always triggers a checkpoint.
    pub fn should_snapshot(&self, ops_since_snapshot: u64, last_snapshot_at: Option<u64>, now_ms: u64) -> bool {
        if ops_since_snapshot >= self.min_ops {
            return true;
        }
        match last_snapshot_at {
            Some(at) => now_ms.saturating_sub(at) >= self.interval_ms,
            None => true,
        }
    }

    /// Retention horizon in milliseconds.
    pub fn retention_ms(&self) -> u64 {
        self.retention_days as u64 * 24 * 60 * 60 * 1000
    }
}

/// Top-level configuration for [`crate::dispatch::CollabCore`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Persistent store configuration.
    pub store: StoreConfig,
    /// Snapshot/retention policy.
    pub snapshot: SnapshotPolicy,
    /// Broadcast channel capacity per document room.
    pub broadcast_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            snapshot: SnapshotPolicy::default(),
            broadcast_capacity: 256,
        }
    }
}

impl CoreConfig {
    /// Config for tests: small caches, temp directory, permissive snapshot policy.
    ///
    /// The snapshot thresholds are raised so tests control checkpointing
    /// explicitly instead of tripping the ops threshold mid-test.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::for_testing(path),
            snapshot: SnapshotPolicy {
                min_ops: 10_000,
                interval_ms: 3_600_000,
                retention_days: 30,
            },
            broadcast_capacity: 64,
        }
    }
}
