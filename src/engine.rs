//! Replicated document handle backed by Yrs.
//!
//! This is the crate's only contact surface with the CRDT implementation.
//! Merging is commutative, associative, and idempotent: applying the same
//! update twice, or updates out of order, always converges to the same
//! state. Everything built on top (ordering, dedup, snapshots, replay)
//! relies on those properties and never compensates for them.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

/// Root text shared type all documents materialize from.
pub const TEXT_ROOT: &str = "content";

/// Engine errors.
#[derive(Debug, Clone)]
pub enum MergeError {
    /// Update payload could not be decoded.
    MalformedUpdate(String),
    /// State vector could not be decoded.
    MalformedStateVector(String),
    /// Decoded update was rejected during application.
    Rejected(String),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::MalformedUpdate(e) => write!(f, "Malformed update: {e}"),
            MergeError::MalformedStateVector(e) => write!(f, "Malformed state vector: {e}"),
            MergeError::Rejected(e) => write!(f, "Update rejected: {e}"),
        }
    }
}

impl std::error::Error for MergeError {}

/// An in-memory replicated document.
///
/// Owned exclusively by one [`crate::session::DocSession`] on the live path,
/// or created ephemerally for historical replay.
pub struct ReplicatedDoc {
    doc: Doc,
}

impl ReplicatedDoc {
    /// Create an empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Create a document from a full-state update (snapshot blob).
    pub fn from_state(state: &[u8]) -> Result<Self, MergeError> {
        let doc = Self::new();
        doc.merge(state)?;
        Ok(doc)
    }

    /// Merge an update payload into the document.
    ///
    /// Safe to call with stale, out-of-order, or duplicate payloads.
    pub fn merge(&self, payload: &[u8]) -> Result<(), MergeError> {
        let update =
            Update::decode_v1(payload).map_err(|e| MergeError::MalformedUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| MergeError::Rejected(e.to_string()))
    }

    /// Encode the document's state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode state as an update, optionally as a diff against a remote
    /// state vector (everything the remote has not seen).
    pub fn state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>, MergeError> {
        let txn = self.doc.transact();
        let sv = match state_vector {
            Some(bytes) => StateVector::decode_v1(bytes)
                .map_err(|e| MergeError::MalformedStateVector(e.to_string()))?,
            None => StateVector::default(),
        };
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Materialize the document's text projection.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        match txn.get_text(TEXT_ROOT) {
            Some(text) => text.get_string(&txn),
            None => String::new(),
        }
    }
}

impl Default for ReplicatedDoc {
    fn default() -> Self {
        Self::new()
    }
}
