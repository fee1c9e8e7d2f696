//! Error types for the Merkle engine.

use thiserror::Error;

use crate::path::NodePath;

/// Errors raised while applying remote summaries to a diff session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    /// A summary arrived for a path that was never requested.
    #[error("unexpected summary for {0}")]
    UnexpectedSummary(NodePath),

    /// A summary is inconsistent with the tree shape rules.
    #[error("invalid summary for {path}: {reason}")]
    InvalidSummary { path: NodePath, reason: String },
}

/// Result type for Merkle operations.
pub type Result<T> = std::result::Result<T, MerkleError>;
