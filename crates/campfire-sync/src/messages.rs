//! Mesh protocol message types.
//!
//! Every frame on a neighbor link is one CBOR-encoded [`MeshMessage`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use campfire_core::{IdentityHash, ItemKey};
use campfire_merkle::{NodePath, NodeSummary, LEAF_CAPACITY};

use crate::error::{Result, SyncError};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits, checked on every received frame.
pub mod limits {
    /// Max encoded frame size.
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
    /// Max trust chain bytes in Hello (64 nodes).
    pub const MAX_TRUST_CHAIN_SIZE: usize = 64 * campfire_core::NODE_SIZE;
    /// Max paths in GetNodes.paths.
    pub const MAX_PATHS_PER_REQUEST: usize = 256;
    /// Max summaries in Nodes.summaries.
    pub const MAX_SUMMARIES_PER_MESSAGE: usize = 256;
    /// Max keys in NeedItems.keys.
    pub const MAX_KEYS_PER_REQUEST: usize = 512;
    /// Max items in Items.items.
    pub const MAX_ITEMS_PER_MESSAGE: usize = 128;
    /// Max size of a single item.
    pub const MAX_ITEM_SIZE: usize = 64 * 1024;
    /// Max length of Error.message.
    pub const MAX_ERROR_MESSAGE: usize = 1024;
    /// Bytes an Items frame spends outside its items.
    pub const ITEMS_FRAME_OVERHEAD: usize = 64;
    /// Bytes the encoding adds to each item (byte string header).
    pub const ITEM_OVERHEAD: usize = 9;
}

/// Split items into Items-frame batches.
///
/// Each batch holds at most `max_items` items and encodes to at most
/// [`limits::MAX_FRAME_SIZE`] bytes. Items over [`limits::MAX_ITEM_SIZE`]
/// must be filtered out first.
pub fn item_batches(items: Vec<Bytes>, max_items: usize) -> Vec<Vec<Bytes>> {
    let max_items = max_items.clamp(1, limits::MAX_ITEMS_PER_MESSAGE);
    let budget = limits::MAX_FRAME_SIZE - limits::ITEMS_FRAME_OVERHEAD;

    let mut batches = Vec::new();
    let mut batch: Vec<Bytes> = Vec::new();
    let mut size = 0;
    for item in items {
        let cost = item.len() + limits::ITEM_OVERHEAD;
        if !batch.is_empty() && (batch.len() == max_items || size + cost > budget) {
            batches.push(std::mem::take(&mut batch));
            size = 0;
        }
        size += cost;
        batch.push(item);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// One answered path in a Nodes message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub path: NodePath,
    pub summary: NodeSummary,
}

/// Mesh protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Handshake: introduce yourself and prove membership.
    Hello {
        /// Protocol version for compatibility checking.
        protocol_version: u8,
        /// The sender's identity hash.
        identity: IdentityHash,
        /// The sender's serialized trust chain.
        trust_chain: Bytes,
    },

    /// Request tree summaries for these paths.
    GetNodes { paths: Vec<NodePath> },

    /// Tree summaries, answering a GetNodes.
    Nodes { summaries: Vec<NodeEntry> },

    /// Request items by key.
    NeedItems { keys: Vec<ItemKey> },

    /// Serialized items, answering NeedItems or relayed.
    Items { items: Vec<Bytes> },

    /// The sender's diff is finished and its requested items have arrived.
    SyncDone,

    /// Error condition. The sender closes the link after sending it.
    Error {
        /// Error code for programmatic handling.
        code: MeshErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl MeshMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MeshMessage::Hello { .. } => "Hello",
            MeshMessage::GetNodes { .. } => "GetNodes",
            MeshMessage::Nodes { .. } => "Nodes",
            MeshMessage::NeedItems { .. } => "NeedItems",
            MeshMessage::Items { .. } => "Items",
            MeshMessage::SyncDone => "SyncDone",
            MeshMessage::Error { .. } => "Error",
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            MeshMessage::Hello { trust_chain, .. } => {
                if trust_chain.len() > limits::MAX_TRUST_CHAIN_SIZE {
                    return Err("trust chain too large");
                }
            }
            MeshMessage::GetNodes { paths } => {
                if paths.len() > limits::MAX_PATHS_PER_REQUEST {
                    return Err("too many paths");
                }
                if !paths.iter().all(NodePath::is_canonical) {
                    return Err("malformed path");
                }
            }
            MeshMessage::Nodes { summaries } => {
                if summaries.len() > limits::MAX_SUMMARIES_PER_MESSAGE {
                    return Err("too many summaries");
                }
                for entry in summaries {
                    if !entry.path.is_canonical() {
                        return Err("malformed path");
                    }
                    match &entry.summary {
                        NodeSummary::Leaf { keys } if keys.len() > LEAF_CAPACITY => {
                            return Err("leaf summary too large");
                        }
                        NodeSummary::Internal { children } if children.len() != 16 => {
                            return Err("internal summary without 16 children");
                        }
                        _ => {}
                    }
                }
            }
            MeshMessage::NeedItems { keys } => {
                if keys.len() > limits::MAX_KEYS_PER_REQUEST {
                    return Err("too many keys");
                }
            }
            MeshMessage::Items { items } => {
                if items.len() > limits::MAX_ITEMS_PER_MESSAGE {
                    return Err("too many items");
                }
                if items.iter().any(|i| i.len() > limits::MAX_ITEM_SIZE) {
                    return Err("item too large");
                }
            }
            MeshMessage::SyncDone => {}
            MeshMessage::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE {
                    return Err("error message too long");
                }
            }
        }
        Ok(())
    }

    /// Encode to a CBOR frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| SyncError::Encoding(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode a CBOR frame and check its limits.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() > limits::MAX_FRAME_SIZE {
            return Err(SyncError::MessageTooLarge {
                size: frame.len(),
                max: limits::MAX_FRAME_SIZE,
            });
        }
        let msg: Self =
            ciborium::from_reader(frame).map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        msg.validate_limits()
            .map_err(|e| SyncError::InvalidMessage(e.to_string()))?;
        Ok(msg)
    }
}

/// Error codes for the mesh protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum MeshErrorCode {
    /// Protocol version mismatch.
    VersionMismatch = 1,
    /// Message too large.
    MessageTooLarge = 2,
    /// Invalid message format.
    InvalidMessage = 3,
    /// Trust chain not accepted.
    Untrusted = 4,
}

impl MeshErrorCode {
    /// The code to send when a received frame fails with `err`.
    pub fn for_error(err: &SyncError) -> Self {
        match err {
            SyncError::MessageTooLarge { .. } => MeshErrorCode::MessageTooLarge,
            SyncError::VersionMismatch { .. } => MeshErrorCode::VersionMismatch,
            SyncError::PeerRejected(_) => MeshErrorCode::Untrusted,
            _ => MeshErrorCode::InvalidMessage,
        }
    }
}
