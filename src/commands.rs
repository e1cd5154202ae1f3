//! Typed commands and events with a binary codec.
//!
//! The transport delivers one [`Command`] per inbound event; each handler
//! in [`crate::dispatch`] answers with [`Effect`]s: a reply to the
//! originating connection, a broadcast to everyone else on the document, or
//! both. Cursor and awareness payloads are validated here by construction —
//! typed fields instead of free-form JSON, so malformed shapes fail to
//! decode at the boundary.
//!
//! Both directions serialize with bincode for minimal overhead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Role;
use crate::presence::{AwarenessValue, PresenceEntry};

/// A cursor/selection range as submitted by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPos {
    pub from: u64,
    pub to: u64,
}

/// An inbound per-connection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Join a document (viewer role required)
    Join { doc_id: Uuid },
    /// Leave a document
    Leave { doc_id: Uuid },
    /// Submit an edit (editor role required)
    Update { doc_id: Uuid, payload: Vec<u8> },
    /// Move the cursor (requires having joined)
    Cursor { doc_id: Uuid, cursor: CursorPos },
    /// Update awareness (requires having joined)
    Awareness {
        doc_id: Uuid,
        fields: HashMap<String, AwarenessValue>,
    },
    /// Request a state diff (viewer role required)
    SyncRequest {
        doc_id: Uuid,
        state_vector: Option<Vec<u8>>,
    },
    /// Connection closed; equivalent to leaving the joined document
    Disconnect,
}

/// Error codes carried on [`ServerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Document does not exist; not retryable
    NotFound,
    /// Role below the required threshold; nothing was mutated
    AccessDenied,
    /// Engine rejected the payload; resubmitting the same bytes will fail
    /// again — request a full resync instead
    MergeRejected,
    /// Store unavailable; retryable infrastructure error
    Persistence,
    /// Presence event for a document this connection has not joined
    NotJoined,
}

/// An outbound event, for the originating connection or the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Join response: full state, state vector, who is here, caller's role
    SyncState {
        doc_id: Uuid,
        state: Vec<u8>,
        state_vector: Vec<u8>,
        presence: Vec<PresenceEntry>,
        role: Role,
    },
    /// Sync-request response: state diff against the submitted vector
    SyncDiff { doc_id: Uuid, state: Vec<u8> },
    /// Acknowledgement of an accepted (or deduplicated) update
    UpdateAck {
        doc_id: Uuid,
        clock: u64,
        sequence: u64,
        duplicate: bool,
    },
    /// Another participant's accepted update
    RemoteUpdate {
        doc_id: Uuid,
        payload: Vec<u8>,
        clock: u64,
        author: Uuid,
    },
    UserJoined { doc_id: Uuid, user_id: Uuid },
    UserLeft { doc_id: Uuid, user_id: Uuid },
    CursorMoved {
        doc_id: Uuid,
        user_id: Uuid,
        cursor: CursorPos,
    },
    AwarenessChanged {
        doc_id: Uuid,
        user_id: Uuid,
        fields: HashMap<String, AwarenessValue>,
    },
    Error { code: ErrorCode, message: String },
}

/// What a handler wants done with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver to the originating connection
    Reply(ServerEvent),
    /// Deliver to every *other* connection joined to the document
    Broadcast(ServerEvent),
}

/// Codec errors.
#[derive(Debug, Clone)]
pub enum CodecError {
    Serialization(String),
    Deserialization(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Serialization(e) => write!(f, "Serialization error: {e}"),
            CodecError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl Command {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (cmd, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Deserialization(e.to_string()))?;
        Ok(cmd)
    }
}

impl ServerEvent {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CodecError::Deserialization(e.to_string()))?;
        Ok(event)
    }
}
