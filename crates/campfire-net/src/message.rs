//! Chat payloads carried inside envelopes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use campfire_core::RoomId;

use crate::error::{MeshError, Result};

/// What a chat message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// UTF-8 text.
    Text(String),
    /// A serialized trust chain, introducing or inviting a member.
    TrustChain(Bytes),
}

impl MessageContent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::Text(_) => "text",
            MessageContent::TrustChain(_) => "trust-chain",
        }
    }
}

/// The plaintext payload of every chat envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room: RoomId,
    /// The sender's display name at send time.
    pub sender_name: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| MeshError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| MeshError::Encoding(e.to_string()))
    }
}
