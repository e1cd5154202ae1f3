//! Persistent storage for document records and the operation log.
//!
//! ```text
//! ┌──────────────┐   append (atomic batch)   ┌──────────────────────────────┐
//! │SyncCoordina- │ ─────────────────────────►│ CollabStore (RocksDB)        │
//! │tor           │                           │                              │
//! └──────────────┘                           │ CF "documents"  — records +  │
//!        ▲                                   │                   snapshots  │
//!        │ snapshot / replay                 │ CF "operations" — doc:clock  │
//!        ▼                                   │ CF "op_hashes"  — dedup      │
//! ┌──────────────┐                           │ CF "op_times"   — doc:ts:clk │
//! │ TimeTravel   │                           └──────────────────────────────┘
//! └──────────────┘
//! ```

pub mod rocks;

pub use rocks::{
    AppendOutcome, CollabStore, DocumentRecord, OperationRecord, SnapshotRecord, StoreConfig,
    StoreError, ENCODING_V1,
};
