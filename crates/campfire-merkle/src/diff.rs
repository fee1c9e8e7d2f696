//! Progressive top-down diff against a remote tree.
//!
//! A [`DiffSession`] starts at the root and asks the remote side for node
//! summaries a batch at a time. Only subtrees whose digests differ are
//! descended into, so the bytes exchanged grow with the divergence rather
//! than with the total number of items.

use std::collections::{BTreeSet, VecDeque};

use campfire_core::{Blake3Hash, ItemKey};

use crate::error::{MerkleError, Result};
use crate::path::{NodePath, FANOUT, MAX_DEPTH};
use crate::tree::{MerkleTree, NodeSummary, LEAF_CAPACITY};

/// Anything that can answer summary requests for a tree.
pub trait SummarySource {
    fn summarize(&self, path: &NodePath) -> NodeSummary;
}

impl SummarySource for MerkleTree {
    fn summarize(&self, path: &NodePath) -> NodeSummary {
        MerkleTree::summarize(self, path)
    }
}

/// The outcome of a diff.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Keys the remote has and we do not.
    pub missing_locally: BTreeSet<ItemKey>,
    /// Keys we have and the remote does not.
    pub missing_remotely: BTreeSet<ItemKey>,
}

impl TreeDiff {
    /// Whether the two trees hold the same keys.
    pub fn is_empty(&self) -> bool {
        self.missing_locally.is_empty() && self.missing_remotely.is_empty()
    }
}

/// State of one in-progress diff.
///
/// Holds a snapshot of the local tree, so local inserts during the session
/// do not disturb it.
#[derive(Debug)]
pub struct DiffSession {
    local: MerkleTree,
    pending: VecDeque<NodePath>,
    in_flight: BTreeSet<NodePath>,
    diff: TreeDiff,
    requested: usize,
}

impl DiffSession {
    /// Start a diff of `local` against a remote tree.
    pub fn new(local: MerkleTree) -> Self {
        Self {
            local,
            pending: VecDeque::from([NodePath::ROOT]),
            in_flight: BTreeSet::new(),
            diff: TreeDiff::default(),
            requested: 0,
        }
    }

    /// Take up to `max` paths to request from the remote.
    pub fn next_request(&mut self, max: usize) -> Vec<NodePath> {
        let n = max.min(self.pending.len());
        let batch: Vec<NodePath> = self.pending.drain(..n).collect();
        self.in_flight.extend(batch.iter().copied());
        self.requested += batch.len();
        batch
    }

    /// Apply the remote's summary for a requested path.
    pub fn apply(&mut self, path: NodePath, remote: NodeSummary) -> Result<()> {
        if !self.in_flight.remove(&path) {
            return Err(MerkleError::UnexpectedSummary(path));
        }
        let local = self.local.summarize(&path);
        if local.digest() == remote.digest() {
            return Ok(());
        }

        match remote {
            NodeSummary::Empty => {
                self.diff
                    .missing_remotely
                    .extend(self.local.keys_under(&path));
            }
            NodeSummary::Leaf { keys } => {
                if keys.len() > LEAF_CAPACITY {
                    return Err(invalid(path, "leaf exceeds capacity"));
                }
                if !keys.iter().all(|k| path.covers(k)) {
                    return Err(invalid(path, "leaf key outside its prefix"));
                }
                let remote: BTreeSet<ItemKey> = keys.into_iter().collect();
                let local: BTreeSet<ItemKey> = self.local.keys_under(&path).into_iter().collect();
                self.diff
                    .missing_locally
                    .extend(remote.difference(&local).copied());
                self.diff
                    .missing_remotely
                    .extend(local.difference(&remote).copied());
            }
            NodeSummary::Internal { children } => {
                if children.len() != FANOUT {
                    return Err(invalid(path, "internal node without 16 children"));
                }
                if path.depth() >= MAX_DEPTH {
                    return Err(invalid(path, "internal node below maximum depth"));
                }
                let local_children = self.local.child_digests(&path);
                for (nibble, remote_digest) in children.iter().enumerate() {
                    if *remote_digest == local_children[nibble] {
                        continue;
                    }
                    let Some(child) = path.child(nibble as u8) else {
                        continue;
                    };
                    if *remote_digest == Blake3Hash::ZERO {
                        self.diff
                            .missing_remotely
                            .extend(self.local.keys_under(&child));
                    } else {
                        self.pending.push_back(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether every requested subtree has been resolved.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Number of paths requested so far.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// The diff accumulated so far.
    pub fn diff(&self) -> &TreeDiff {
        &self.diff
    }

    /// Consume the session, returning its diff.
    pub fn finish(self) -> TreeDiff {
        self.diff
    }
}

fn invalid(path: NodePath, reason: &str) -> MerkleError {
    MerkleError::InvalidSummary {
        path,
        reason: reason.to_string(),
    }
}

impl MerkleTree {
    /// Diff this tree against `remote`, running a session to completion.
    pub fn diff(&self, remote: &impl SummarySource) -> Result<TreeDiff> {
        let mut session = DiffSession::new(self.snapshot());
        loop {
            let batch = session.next_request(usize::MAX);
            if batch.is_empty() {
                break;
            }
            for path in batch {
                session.apply(path, remote.summarize(&path))?;
            }
        }
        Ok(session.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(i: u32) -> ItemKey {
        ItemKey::of(&i.to_le_bytes())
    }

    #[test]
    fn test_identical_trees_one_round() {
        let a = MerkleTree::from_keys((0..500).map(key));
        let b = MerkleTree::from_keys((0..500).map(key));
        let mut session = DiffSession::new(a.snapshot());
        let batch = session.next_request(64);
        assert_eq!(batch, vec![NodePath::ROOT]);
        session.apply(NodePath::ROOT, b.summarize(&NodePath::ROOT)).unwrap();
        assert!(session.is_complete());
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_empty_sides() {
        let empty = MerkleTree::new();
        let full = MerkleTree::from_keys((0..40).map(key));

        let d = empty.diff(&full).unwrap();
        assert_eq!(d.missing_locally.len(), 40);
        assert!(d.missing_remotely.is_empty());

        let d = full.diff(&empty).unwrap();
        assert_eq!(d.missing_remotely.len(), 40);
        assert!(d.missing_locally.is_empty());

        assert!(empty.diff(&MerkleTree::new()).unwrap().is_empty());
    }

    #[test]
    fn test_small_divergence_touches_few_nodes() {
        let base: Vec<ItemKey> = (0..2000).map(key).collect();
        let a = MerkleTree::from_keys(base.clone());
        let mut b = MerkleTree::from_keys(base);
        b.insert(key(999_999));

        let mut session = DiffSession::new(a.snapshot());
        while !session.is_complete() {
            for path in session.next_request(64) {
                session.apply(path, b.summarize(&path)).unwrap();
            }
        }
        assert!(session.requested() < 10);
        let d = session.finish();
        assert_eq!(d.missing_locally, BTreeSet::from([key(999_999)]));
        assert!(d.missing_remotely.is_empty());
    }

    #[test]
    fn test_unexpected_summary_rejected() {
        let mut session = DiffSession::new(MerkleTree::new());
        let stray = NodePath::ROOT.child(3).unwrap();
        assert_eq!(
            session.apply(stray, NodeSummary::Empty),
            Err(MerkleError::UnexpectedSummary(stray))
        );
    }

    #[test]
    fn test_malformed_summaries_rejected() {
        let local = MerkleTree::from_keys((0..3).map(key));

        let mut session = DiffSession::new(local.snapshot());
        session.next_request(1);
        let oversized = NodeSummary::Leaf {
            keys: (100..110).map(key).collect(),
        };
        assert!(matches!(
            session.apply(NodePath::ROOT, oversized),
            Err(MerkleError::InvalidSummary { .. })
        ));

        let mut session = DiffSession::new(local.snapshot());
        session.next_request(1);
        let short = NodeSummary::Internal {
            children: vec![Blake3Hash::ZERO; 3],
        };
        assert!(matches!(
            session.apply(NodePath::ROOT, short),
            Err(MerkleError::InvalidSummary { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_diff_is_exact(
            shared in proptest::collection::btree_set(0u32..5000, 0..150),
            only_a in proptest::collection::btree_set(5000u32..10000, 0..40),
            only_b in proptest::collection::btree_set(10000u32..15000, 0..40),
        ) {
            let a = MerkleTree::from_keys(shared.iter().chain(&only_a).map(|i| key(*i)));
            let b = MerkleTree::from_keys(shared.iter().chain(&only_b).map(|i| key(*i)));

            let d = a.diff(&b).unwrap();
            let expect_locally: BTreeSet<ItemKey> = only_b.iter().map(|i| key(*i)).collect();
            let expect_remotely: BTreeSet<ItemKey> = only_a.iter().map(|i| key(*i)).collect();
            prop_assert_eq!(&d.missing_locally, &expect_locally);
            prop_assert_eq!(&d.missing_remotely, &expect_remotely);

            prop_assert!(a.diff(&a.snapshot()).unwrap().is_empty());
        }
    }
}
