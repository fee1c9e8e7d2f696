//! Error types for the mesh coordinator.

use thiserror::Error;

use campfire_core::CoreError;
use campfire_identity::IdentityError;
use campfire_sync::SyncError;

/// Errors that can occur during mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Identity, trust chain, or envelope crypto error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Envelope bytes did not parse.
    #[error("malformed envelope: {0}")]
    Envelope(#[from] CoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Chat message could not be encoded or decoded.
    #[error("chat message encoding: {0}")]
    Encoding(String),

    /// Envelope exceeds the size a link will carry.
    #[error("envelope of {size} bytes exceeds limit of {max}")]
    ItemTooLarge { size: usize, max: usize },
}

impl MeshError {
    /// Whether the error came from signature, decryption, or key checks.
    pub fn is_cryptographic(&self) -> bool {
        matches!(self, MeshError::Identity(e) if e.is_cryptographic())
    }
}

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;
