//! # vellum-collab — Document synchronization & presence engine
//!
//! Accepts concurrent edits against shared documents, merges them through a
//! CRDT engine (Yrs), assigns a server-side total order, persists a
//! deduplicated operation log, checkpoints full state periodically, and
//! reconstructs historical state on demand. Presence (who is connected,
//! cursors, awareness) is tracked per document, independent of the edit path.
//!
//! ## Architecture
//!
//! ```text
//! Command (join/update/cursor/…)
//!       │
//!       ▼
//! ┌─────────────┐   editor role   ┌─────────────┐
//! │ CollabCore  │ ───────────────►│ AccessGate  │
//! │ (dispatch)  │                 └─────────────┘
//! └──────┬──────┘
//!        │ per-document critical section
//!        ▼
//! ┌─────────────┐     merge      ┌──────────────┐
//! │SyncCoordina-│ ──────────────►│ ReplicatedDoc│
//! │tor          │                │ (Yrs)        │
//! └──────┬──────┘                └──────────────┘
//!        │ clock/sequence + dedup hash
//!        ▼
//! ┌─────────────┐   snapshots    ┌──────────────┐
//! │ CollabStore │ ◄──────────────│SnapshotManager│
//! │ (RocksDB)   │                └──────────────┘
//! └──────┬──────┘
//!        │ accepted ops
//!        ▼
//! ┌─────────────┐
//! │ RoomManager │ ── fan-out to other connections
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] — Yrs-backed replicated document handle
//! - [`access`] — role resolution and access checks
//! - [`session`] — live sessions with single-flight loading
//! - [`sync`] — the apply-update critical section
//! - [`snapshot`] — checkpoint policy, compaction, retention
//! - [`timetravel`] — point-in-time state reconstruction
//! - [`presence`] — multi-connection presence, cursors, awareness
//! - [`commands`] — typed commands/events with a binary codec
//! - [`dispatch`] — command handlers producing reply/broadcast effects
//! - [`broadcast`] — per-document fan-out groups
//! - [`storage`] — RocksDB-backed operation log and document records

pub mod access;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod presence;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod timetravel;

// Re-exports for convenience
pub use access::{has_access, resolve_role, Permission, Role};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager, RoomMessage};
pub use commands::{CodecError, Command, CursorPos, Effect, ErrorCode, ServerEvent};
pub use config::{CoreConfig, SnapshotPolicy};
pub use dispatch::{CollabCore, ConnectionCtx, CoreStats};
pub use engine::{MergeError, ReplicatedDoc};
pub use presence::{Awareness, AwarenessValue, Cursor, PresenceEntry, PresenceTracker};
pub use session::{DocSession, SessionCache};
pub use snapshot::{SnapshotInfo, SnapshotManager};
pub use storage::{
    AppendOutcome, CollabStore, DocumentRecord, OperationRecord, SnapshotRecord, StoreConfig,
    StoreError, ENCODING_V1,
};
pub use sync::{operation_hash, ApplyOutcome, SyncCoordinator, SyncError};
pub use timetravel::{HistoricalState, TimeTravel, TimeTravelError};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
