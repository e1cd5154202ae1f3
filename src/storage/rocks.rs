//! RocksDB-backed document and operation store.
//!
//! Column families:
//! - `documents`  — Document records: access settings, counters, latest
//!                  snapshot (state + state vector LZ4 compressed, text
//!                  projection)
//! - `operations` — Operation log, keyed by `doc_id:clock` (LZ4 payloads)
//! - `op_hashes`  — Content-hash index for duplicate rejection (unique)
//! - `op_times`   — Time index `doc_id:timestamp:clock` for range replay
//!
//! Every accepted operation is written in one atomic batch together with
//! its index entries and the document's counter bumps, so the log, the
//! dedup index, and the counters can never disagree after a crash.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::access::{Permission, Role};

/// Column family names.
const CF_DOCUMENTS: &str = "documents";
const CF_OPERATIONS: &str = "operations";
const CF_OP_HASHES: &str = "op_hashes";
const CF_OP_TIMES: &str = "op_times";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_OPERATIONS, CF_OP_HASHES, CF_OP_TIMES];

/// Current encoding version for stored blobs (Yrs v1 update format).
///
/// Stored alongside every record so the engine wire format can evolve
/// without silently misreading old data.
pub const ENCODING_V1: u8 = 1;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 128MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vellum_data"),
            block_cache_size: 128 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    Database(String),
    /// Document not found
    NotFound(Uuid),
    /// Document already exists
    AlreadyExists(Uuid),
    /// Serialization failed
    Serialization(String),
    /// Deserialization failed
    Deserialization(String),
    /// LZ4 (de)compression failed
    Compression(String),
    /// Record carries an encoding version this build does not understand
    UnsupportedEncoding(u8),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "Document already exists: {id}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
            StoreError::UnsupportedEncoding(v) => write!(f, "Unsupported encoding version: {v}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Latest snapshot of a document's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Full engine state as an update blob
    pub state: Vec<u8>,
    /// Engine state vector
    pub state_vector: Vec<u8>,
    /// Materialized text projection at capture time
    pub content: String,
    /// Capture timestamp (ms since epoch)
    pub taken_at: u64,
    /// Blob encoding version
    pub encoding: u8,
}

/// One record per document: access settings, counters, latest snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: Uuid,
    /// Implicit owner (document creator)
    pub owner: Uuid,
    /// Explicit per-user permission entries
    pub permissions: Vec<Permission>,
    pub is_public: bool,
    /// Default role for public documents
    pub public_role: Option<Role>,
    /// Bumped once per accepted operation
    pub version: u64,
    /// Operations accepted since the last snapshot
    pub ops_since_snapshot: u64,
    pub snapshot: Option<SnapshotRecord>,
    /// Creation timestamp (ms since epoch)
    pub created_at: u64,
    /// Last modification timestamp (ms since epoch)
    pub updated_at: u64,
    /// Record encoding version
    pub encoding: u8,
}

impl DocumentRecord {
    pub fn new(doc_id: Uuid, owner: Uuid, now_ms: u64) -> Self {
        Self {
            doc_id,
            owner,
            permissions: Vec::new(),
            is_public: false,
            public_role: None,
            version: 0,
            ops_since_snapshot: 0,
            snapshot: None,
            created_at: now_ms,
            updated_at: now_ms,
            encoding: ENCODING_V1,
        }
    }
}

/// An accepted edit, immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub doc_id: Uuid,
    /// Submitting user
    pub author: Uuid,
    /// Raw engine update payload
    pub payload: Vec<u8>,
    /// Server-assigned logical clock (per document, strictly increasing)
    pub clock: u64,
    /// Server-assigned sequence number (separate counter, same rule)
    pub sequence: u64,
    /// blake3 hex over payload ∥ author ∥ client_id ∥ clock; unique in the log
    pub hash: String,
    /// Opaque id of the submitting connection
    pub client_id: String,
    /// Wall-clock timestamp (ms since epoch)
    pub timestamp: u64,
    /// Uncompressed payload size in bytes
    pub size: u32,
    /// Set by compaction bookkeeping; compacted records survive `compact_operations`
    pub compacted: bool,
    /// Payload encoding version
    pub encoding: u8,
}

/// Result of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record written together with its index entries
    Appended,
    /// Content hash already present; nothing written
    Duplicate,
}

/// RocksDB-backed store for document records and the operation log.
pub struct CollabStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl CollabStore {
    /// Open the store at the configured path, creating the database and
    /// column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // One record per document, frequent point reads
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_OPERATIONS => {
                // Many small writes, prefix-scanned by doc_id
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_OP_HASHES => {
                // Tiny values, existence checks on the hot path
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_OP_TIMES => {
                // Index-only entries, prefix-scanned by doc_id
                opts.set_max_write_buffer_number(2);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    // ─── Document records ─────────────────────────────────────────────

    /// Create a new document record. Fails if the document already exists.
    ///
    /// Called by the external CRUD layer (and tests); the sync path never
    /// creates documents implicitly.
    pub fn create_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let key = record.doc_id.as_bytes().to_vec();
        if self.db.get_cf(&cf, &key)?.is_some() {
            return Err(StoreError::AlreadyExists(record.doc_id));
        }
        self.write_document(record)
    }

    /// Overwrite a document record (access settings changes etc.).
    pub fn put_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        self.write_document(record)
    }

    fn write_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let encoded = encode_document(record)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(&cf, record.doc_id.as_bytes(), &encoded, &write_opts)?;
        Ok(())
    }

    /// Load a document record. Snapshot blobs come back decompressed.
    pub fn load_document(&self, doc_id: Uuid) -> Result<DocumentRecord, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, doc_id.as_bytes())? {
            Some(bytes) => decode_document(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    /// Check if a document exists.
    pub fn document_exists(&self, doc_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(&cf, doc_id.as_bytes())?.is_some())
    }

    /// Delete a document record and its entire operation log.
    pub fn delete_document(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_hashes = self.cf(CF_OP_HASHES)?;
        let cf_times = self.cf(CF_OP_TIMES)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, doc_id.as_bytes());

        let iter = self.db.iterator_cf(
            &cf_ops,
            IteratorMode::From(&op_key(doc_id, 0), Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            let record = decode_operation(&value)?;
            batch.delete_cf(&cf_ops, &key);
            batch.delete_cf(&cf_hashes, record.hash.as_bytes());
            batch.delete_cf(&cf_times, time_key(doc_id, record.timestamp, record.clock));
        }

        self.db.write(batch)?;
        Ok(())
    }

    // ─── Operation log ────────────────────────────────────────────────

    /// Append an operation record, rejecting content-hash duplicates.
    ///
    /// On success the record, its hash index entry, its time index entry,
    /// and the document's version / ops-since-snapshot bumps are written in
    /// one atomic batch. On a duplicate hash nothing is written at all.
    pub fn append_operation(&self, record: &OperationRecord) -> Result<AppendOutcome, StoreError> {
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_hashes = self.cf(CF_OP_HASHES)?;
        let cf_times = self.cf(CF_OP_TIMES)?;
        let cf_docs = self.cf(CF_DOCUMENTS)?;

        if self.db.get_cf(&cf_hashes, record.hash.as_bytes())?.is_some() {
            return Ok(AppendOutcome::Duplicate);
        }

        let mut doc = self.load_document(record.doc_id)?;
        doc.version += 1;
        doc.ops_since_snapshot += 1;
        doc.updated_at = record.timestamp;

        let key = op_key(record.doc_id, record.clock);
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_ops, &key, encode_operation(record)?);
        batch.put_cf(&cf_hashes, record.hash.as_bytes(), &key);
        batch.put_cf(
            &cf_times,
            time_key(record.doc_id, record.timestamp, record.clock),
            b"",
        );
        batch.put_cf(&cf_docs, record.doc_id.as_bytes(), encode_document(&doc)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(AppendOutcome::Appended)
    }

    /// Check whether a content hash exists in the log.
    pub fn contains_hash(&self, hash: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_OP_HASHES)?;
        Ok(self.db.get_cf(&cf, hash.as_bytes())?.is_some())
    }

    /// Load a single operation by (doc, clock).
    pub fn load_operation(&self, doc_id: Uuid, clock: u64) -> Result<OperationRecord, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        match self.db.get_cf(&cf, op_key(doc_id, clock))? {
            Some(bytes) => decode_operation(&bytes),
            None => Err(StoreError::NotFound(doc_id)),
        }
    }

    /// Highest persisted (clock, sequence) for a document, if any.
    ///
    /// This is the cold-start reconstruction rule: counter values consumed
    /// by rejected duplicates leave no record and are not recovered.
    pub fn last_clock_seq(&self, doc_id: Uuid) -> Result<Option<(u64, u64)>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let mut iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&op_key(doc_id, u64::MAX), Direction::Reverse),
        );
        match iter.next() {
            Some(Ok((key, value))) => {
                if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                    return Ok(None);
                }
                let record = decode_operation(&value)?;
                Ok(Some((record.clock, record.sequence)))
            }
            Some(Err(e)) => Err(StoreError::Database(e.to_string())),
            None => Ok(None),
        }
    }

    /// All operations with timestamp in `[start_ms, end_ms]`, ascending by clock.
    pub fn operations_in_range(
        &self,
        doc_id: Uuid,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let cf_times = self.cf(CF_OP_TIMES)?;

        let mut clocks = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_times,
            IteratorMode::From(&time_key(doc_id, start_ms, 0), Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 32 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            let mut ts_buf = [0u8; 8];
            ts_buf.copy_from_slice(&key[16..24]);
            if u64::from_be_bytes(ts_buf) > end_ms {
                break;
            }
            let mut clock_buf = [0u8; 8];
            clock_buf.copy_from_slice(&key[24..32]);
            clocks.push(u64::from_be_bytes(clock_buf));
        }

        // Replay order is by clock, not arrival time.
        clocks.sort_unstable();

        let mut records = Vec::with_capacity(clocks.len());
        for clock in clocks {
            records.push(self.load_operation(doc_id, clock)?);
        }
        Ok(records)
    }

    /// All operations with clock strictly greater than `since_clock`.
    pub fn operations_since(
        &self,
        doc_id: Uuid,
        since_clock: u64,
    ) -> Result<Vec<OperationRecord>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let start = since_clock.saturating_add(1);

        let mut records = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&op_key(doc_id, start), Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            records.push(decode_operation(&value)?);
        }
        Ok(records)
    }

    /// Count persisted operations for a document.
    pub fn operation_count(&self, doc_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let mut count = 0u64;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&op_key(doc_id, 0), Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    // ─── Snapshots ────────────────────────────────────────────────────

    /// Persist a snapshot: full state, state vector, text projection,
    /// timestamp. Resets the ops-since-snapshot counter. Never touches the
    /// operation log.
    pub fn save_snapshot(
        &self,
        doc_id: Uuid,
        state: &[u8],
        state_vector: &[u8],
        content: &str,
        taken_at: u64,
    ) -> Result<(), StoreError> {
        let mut doc = self.load_document(doc_id)?;
        doc.snapshot = Some(SnapshotRecord {
            state: state.to_vec(),
            state_vector: state_vector.to_vec(),
            content: content.to_string(),
            taken_at,
            encoding: ENCODING_V1,
        });
        doc.ops_since_snapshot = 0;
        doc.updated_at = taken_at;
        self.write_document(&doc)
    }

    // ─── Pruning ──────────────────────────────────────────────────────

    /// Delete a document's operations older than `cutoff_ms` that are not
    /// flagged compacted. Returns the number deleted.
    pub fn compact_operations(&self, doc_id: Uuid, cutoff_ms: u64) -> Result<u64, StoreError> {
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_hashes = self.cf(CF_OP_HASHES)?;
        let cf_times = self.cf(CF_OP_TIMES)?;

        let mut batch = WriteBatch::default();
        let mut count = 0u64;
        let iter = self.db.iterator_cf(
            &cf_ops,
            IteratorMode::From(&op_key(doc_id, 0), Direction::Forward),
        );
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 || &key[..16] != doc_id.as_bytes() {
                break;
            }
            let record = decode_operation(&value)?;
            if record.timestamp < cutoff_ms && !record.compacted {
                batch.delete_cf(&cf_ops, &key);
                batch.delete_cf(&cf_hashes, record.hash.as_bytes());
                batch.delete_cf(&cf_times, time_key(doc_id, record.timestamp, record.clock));
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    /// Delete ALL operations older than `cutoff_ms`, across every document,
    /// regardless of the compacted flag. This is the unconditional retention
    /// expiry; it runs independently of `compact_operations`.
    pub fn expire_operations(&self, cutoff_ms: u64) -> Result<u64, StoreError> {
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_hashes = self.cf(CF_OP_HASHES)?;
        let cf_times = self.cf(CF_OP_TIMES)?;

        let mut batch = WriteBatch::default();
        let mut count = 0u64;
        let iter = self.db.iterator_cf(&cf_ops, IteratorMode::Start);
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if key.len() < 24 {
                continue;
            }
            let record = decode_operation(&value)?;
            if record.timestamp < cutoff_ms {
                batch.delete_cf(&cf_ops, &key);
                batch.delete_cf(&cf_hashes, record.hash.as_bytes());
                batch.delete_cf(
                    &cf_times,
                    time_key(record.doc_id, record.timestamp, record.clock),
                );
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
        }
        Ok(count)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

/// Operation key: doc_id (16 bytes) + clock (8 bytes big-endian).
fn op_key(doc_id: Uuid, clock: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(doc_id.as_bytes());
    key.extend_from_slice(&clock.to_be_bytes());
    key
}

/// Time index key: doc_id (16) + timestamp (8 BE) + clock (8 BE).
fn time_key(doc_id: Uuid, timestamp: u64, clock: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(doc_id.as_bytes());
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(&clock.to_be_bytes());
    key
}

fn encode_document(record: &DocumentRecord) -> Result<Vec<u8>, StoreError> {
    let mut stored = record.clone();
    if let Some(snapshot) = stored.snapshot.as_mut() {
        snapshot.state = lz4_flex::compress_prepend_size(&snapshot.state);
        snapshot.state_vector = lz4_flex::compress_prepend_size(&snapshot.state_vector);
    }
    bincode::serde::encode_to_vec(&stored, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_document(bytes: &[u8]) -> Result<DocumentRecord, StoreError> {
    let (mut record, _): (DocumentRecord, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    if record.encoding != ENCODING_V1 {
        return Err(StoreError::UnsupportedEncoding(record.encoding));
    }
    if let Some(snapshot) = record.snapshot.as_mut() {
        if snapshot.encoding != ENCODING_V1 {
            return Err(StoreError::UnsupportedEncoding(snapshot.encoding));
        }
        snapshot.state = lz4_flex::decompress_size_prepended(&snapshot.state)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        snapshot.state_vector = lz4_flex::decompress_size_prepended(&snapshot.state_vector)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
    }
    Ok(record)
}

fn encode_operation(record: &OperationRecord) -> Result<Vec<u8>, StoreError> {
    let mut stored = record.clone();
    stored.payload = lz4_flex::compress_prepend_size(&stored.payload);
    bincode::serde::encode_to_vec(&stored, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_operation(bytes: &[u8]) -> Result<OperationRecord, StoreError> {
    let (mut record, _): (OperationRecord, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    if record.encoding != ENCODING_V1 {
        return Err(StoreError::UnsupportedEncoding(record.encoding));
    }
    record.payload = lz4_flex::decompress_size_prepended(&record.payload)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    Ok(record)
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
