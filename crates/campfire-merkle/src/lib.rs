//! # CampfireNet Merkle
//!
//! Anti-entropy for the local message log. Items are keyed by the Blake3 hash
//! of their serialized bytes and placed in a 16-way prefix tree, so peers
//! with the same items hold identical trees regardless of insertion order.
//!
//! ## Key Types
//!
//! - [`ItemLog`] - Deduplicating log of items, backing a [`MerkleTree`]
//! - [`MerkleTree`] - Copy-on-write prefix tree with O(1) snapshots
//! - [`DiffSession`] - Progressive, pull-based diff against a remote tree
//! - [`TreeDiff`] - Keys missing on each side
//!
//! ## Diff Protocol
//!
//! A session requests summaries for paths, starting at the root. Matching
//! digests end the descent; mismatches are requested one level deeper until
//! a leaf or an empty subtree settles them.

pub mod diff;
pub mod error;
pub mod log;
pub mod path;
pub mod tree;

pub use diff::{DiffSession, SummarySource, TreeDiff};
pub use error::{MerkleError, Result};
pub use log::{InsertResult, ItemLog, ItemOperations};
pub use path::NodePath;
pub use tree::{MerkleTree, NodeSummary, LEAF_CAPACITY};
