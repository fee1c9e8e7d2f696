//! Error types for CampfireNet Core.

use thiserror::Error;

use crate::permission::Permission;

/// Core errors from primitive and codec operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("bad key size: expected {expected} bytes, got {got}")]
    BadKeySize { expected: usize, got: usize },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("name too long: {len} bytes exceeds capacity of {max}")]
    NameTooLong { len: usize, max: usize },
}

/// Trust chain validation failures.
///
/// A chain that fails any of these checks must not be installed, in whole
/// or in part.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("trust chain is empty")]
    Empty,

    #[error("trust chain length {0} is not a whole number of nodes")]
    MalformedLength(usize),

    #[error("node {index}: name field is malformed")]
    MalformedName { index: usize },

    #[error("root node is not self-issued")]
    RootNotSelfIssued,

    #[error("root node must hold and grant All, got held={held} grantable={grantable}")]
    RootNotAll {
        held: Permission,
        grantable: Permission,
    },

    #[error("node {index}: parent id does not match the previous node")]
    BrokenContinuity { index: usize },

    #[error("node {index}: signature does not verify under the parent key")]
    BadSignature { index: usize },

    #[error("node {index}: held {held} exceeds parent's grantable {parent_grantable}")]
    HeldExceedsParentGrantable {
        index: usize,
        held: Permission,
        parent_grantable: Permission,
    },

    #[error("node {index}: grantable {grantable} exceeds its own held {held}")]
    GrantableExceedsHeld {
        index: usize,
        grantable: Permission,
        held: Permission,
    },

    #[error("node {index}: delegating parent does not hold Invite")]
    ParentCannotInvite { index: usize },

    #[error("trust chain does not terminate at the expected identity")]
    WrongTerminal,

    #[error("trust chain does not share our root")]
    ForeignRoot,
}
