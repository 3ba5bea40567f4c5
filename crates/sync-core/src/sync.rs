//! Binary sync protocol exchanged between two peers over an established connection.
//!
//! Handshake and bare gossip travel as JSON for cross-implementation
//! compatibility (see [`crate::protocol::handshake`] and
//! [`crate::protocol::envelope`]); everything here is bincode, distinguished
//! on the wire via [`crate::protocol::detect_message_type`]. Every outbound
//! sync message is wrapped in a [`SyncEnvelope`] so SWIM gossip updates ride
//! along for free instead of needing their own round trip.

use crate::swim::GossipUpdate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncCodecError {
    #[error("bincode encode/decode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

pub type Result<T> = std::result::Result<T, SyncCodecError>;

/// What kind of out-of-band filesystem change a [`FileOp`] describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FileOpKind {
    Delete,
    Rename,
}

/// A filesystem-level change that can't be expressed as a CRDT document
/// update: deleting a note or renaming it on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileOp {
    pub op: FileOpKind,
    pub path: String,
    pub new_path: Option<String>,
}

impl FileOp {
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            op: FileOpKind::Delete,
            path: path.into(),
            new_path: None,
        }
    }

    pub fn rename(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            op: FileOpKind::Rename,
            path: old_path.into(),
            new_path: Some(new_path.into()),
        }
    }
}

/// Initial request to kick off a sync exchange: what a peer already has, so
/// the responder can send only what's missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncRequest {
    /// Encoded version vector of the requester's path registry.
    pub registry_version: Vec<u8>,
    /// Encoded version vector of each document the requester already has,
    /// keyed by doc id.
    pub document_versions: HashMap<String, Vec<u8>>,
}

impl SyncRequest {
    pub fn new(registry_version: Vec<u8>, document_versions: HashMap<String, Vec<u8>>) -> Self {
        Self {
            registry_version,
            document_versions,
        }
    }
}

/// Reply to a [`SyncRequest`]: the deltas the responder has that the
/// requester's version vectors show it is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncResponse {
    /// Registry delta relative to the requester's registry version, if any.
    pub registry_delta: Option<Vec<u8>>,
    /// Per-document deltas, keyed by doc id, for documents the requester
    /// already knows about.
    pub per_doc_deltas: HashMap<String, Vec<u8>>,
    /// Full snapshots for documents the requester has never seen, keyed by
    /// doc id.
    pub new_docs: HashMap<String, Vec<u8>>,
}

impl SyncResponse {
    pub fn is_empty(&self) -> bool {
        self.registry_delta.is_none() && self.per_doc_deltas.is_empty() && self.new_docs.is_empty()
    }
}

/// A single sync-protocol message. Always bincode-encoded, always wrapped in
/// a [`SyncEnvelope`] before being sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncMessage {
    /// Ask a peer what has changed since our last known state.
    SyncRequest(SyncRequest),
    /// Reply to a `SyncRequest` with the missing deltas/snapshots.
    SyncResponse(SyncResponse),
    /// Unsolicited incremental update for a single document, broadcast after
    /// a local edit.
    DocumentUpdate { doc_id: String, data: Vec<u8> },
    /// A filesystem change with no CRDT delta of its own.
    FileOp(FileOp),
}

impl SyncMessage {
    pub fn document_update(doc_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self::DocumentUpdate {
            doc_id: doc_id.into(),
            data,
        }
    }
}

/// Wire envelope for every sync message: the message itself plus whatever
/// SWIM gossip updates happened to be pending for this peer. Piggybacking
/// gossip here means membership dissemination costs nothing extra as long as
/// two peers are already syncing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEnvelope {
    pub message: SyncMessage,
    #[serde(default)]
    pub gossip: Vec<GossipUpdate>,
}

impl SyncEnvelope {
    pub fn new(message: SyncMessage, gossip: Vec<GossipUpdate>) -> Self {
        Self { message, gossip }
    }

    pub fn without_gossip(message: SyncMessage) -> Self {
        Self {
            message,
            gossip: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
