//! Error types for identity operations.

use thiserror::Error;

use campfire_core::{ChainError, CoreError, IdentityHash, Permission};

/// Errors that can occur during identity and envelope operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The trust chain failed validation.
    #[error("trust chain rejected: {0}")]
    Chain(#[from] ChainError),

    /// Attempted to delegate permissions that are not held or grantable.
    #[error("not authorized to grant held={held} grantable={grantable}")]
    Unauthorized {
        held: Permission,
        grantable: Permission,
    },

    /// Operation requires an installed trust chain.
    #[error("identity has no trust chain")]
    NoTrustChain,

    /// Display name does not fit the chain node's name field.
    #[error("name too long: {len} bytes exceeds capacity of {max}")]
    NameTooLong { len: usize, max: usize },

    /// Sender is not in the identity registry.
    #[error("unknown sender: {0}")]
    UnknownSender(IdentityHash),

    /// Envelope signature did not verify.
    #[error("envelope signature verification failed")]
    VerificationFailed,

    /// Unicast payload could not be encrypted.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Unicast payload could not be decrypted.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The sender hash sealed inside a unicast payload differs from the envelope's.
    #[error("embedded sender does not match envelope sender")]
    SenderMismatch,

    /// A key of the right size that is not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// A key had the wrong size.
    #[error("bad key size: expected {expected} bytes, got {got}")]
    BadKeySize { expected: usize, got: usize },

    /// Core error.
    #[error("core error: {0}")]
    Core(CoreError),

    /// Key persistence I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentityError {
    /// Whether this failure is a per-envelope cryptographic rejection.
    pub fn is_cryptographic(&self) -> bool {
        matches!(
            self,
            Self::VerificationFailed
                | Self::EncryptionFailed(_)
                | Self::DecryptionFailed(_)
                | Self::SenderMismatch
                | Self::InvalidPublicKey
                | Self::BadKeySize { .. }
        )
    }
}

impl From<CoreError> for IdentityError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::BadKeySize { expected, got } => Self::BadKeySize { expected, got },
            CoreError::NameTooLong { len, max } => Self::NameTooLong { len, max },
            CoreError::InvalidSignature => Self::VerificationFailed,
            CoreError::InvalidPublicKey => Self::InvalidPublicKey,
            other => Self::Core(other),
        }
    }
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
