//! Error types for neighbor connections.

use thiserror::Error;

use campfire_merkle::MerkleError;

use crate::messages::MeshErrorCode;
use crate::state::ConnectionState;

/// Errors that end a neighbor connection.
///
/// None of these escape the connection: they are logged and the link
/// returns to `Disconnected`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Message failed to decode or broke the protocol.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame larger than the protocol allows.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Message could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: MeshErrorCode, message: String },

    /// The peer's identity or trust chain was not accepted.
    #[error("peer rejected: {0}")]
    PeerRejected(String),

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Attempted a state change the machine does not allow.
    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Remote tree summary was inconsistent.
    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    /// Connection was cancelled locally.
    #[error("connection cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
