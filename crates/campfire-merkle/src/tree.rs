//! The Merkle prefix tree.
//!
//! Keys are placed by their nibbles: a node at depth `d` holding more than
//! [`LEAF_CAPACITY`] keys splits into 16 children by nibble `d`. With no
//! deletions the shape under any prefix depends only on the keys under it,
//! so two peers holding the same keys hold byte-identical trees.
//!
//! Digests:
//! - empty: all zeros
//! - leaf: `H("leaf" ‖ sorted keys)`
//! - internal: `H("node" ‖ 16 child digests)`
//!
//! Nodes are shared through `Arc`. Inserting rewrites only the nodes on the
//! key's path, and cloning a tree is a constant-time snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use campfire_core::{Blake3Hash, ItemKey};

use crate::path::{NodePath, FANOUT};

/// Maximum keys held by a leaf before it splits.
pub const LEAF_CAPACITY: usize = 8;

/// Digest of a leaf holding `keys`, which must be sorted.
pub fn leaf_digest(keys: &[ItemKey]) -> Blake3Hash {
    if keys.is_empty() {
        return Blake3Hash::ZERO;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"leaf");
    for key in keys {
        hasher.update(key.as_bytes());
    }
    Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
}

/// Digest of an internal node with the given child digests.
pub fn node_digest(children: &[Blake3Hash]) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"node");
    for child in children {
        hasher.update(child.as_bytes());
    }
    Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
}

/// What a peer learns about one subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSummary {
    /// No keys under this path.
    Empty,
    /// At most [`LEAF_CAPACITY`] keys, listed in order.
    Leaf { keys: Vec<ItemKey> },
    /// The digests of all 16 children.
    Internal { children: Vec<Blake3Hash> },
}

impl NodeSummary {
    /// The digest of the summarized subtree.
    pub fn digest(&self) -> Blake3Hash {
        match self {
            Self::Empty => Blake3Hash::ZERO,
            Self::Leaf { keys } => leaf_digest(keys),
            Self::Internal { children } => node_digest(children),
        }
    }
}

#[derive(Debug)]
enum Node {
    Empty,
    Leaf {
        keys: Vec<ItemKey>,
        digest: Blake3Hash,
    },
    Internal {
        children: Box<[Arc<Node>; FANOUT]>,
        digest: Blake3Hash,
        len: usize,
    },
}

impl Node {
    fn digest(&self) -> Blake3Hash {
        match self {
            Node::Empty => Blake3Hash::ZERO,
            Node::Leaf { digest, .. } | Node::Internal { digest, .. } => *digest,
        }
    }

    fn len(&self) -> usize {
        match self {
            Node::Empty => 0,
            Node::Leaf { keys, .. } => keys.len(),
            Node::Internal { len, .. } => *len,
        }
    }

    fn leaf(keys: Vec<ItemKey>) -> Self {
        let digest = leaf_digest(&keys);
        Node::Leaf { keys, digest }
    }

    fn internal(children: Box<[Arc<Node>; FANOUT]>) -> Self {
        let digests: Vec<Blake3Hash> = children.iter().map(|c| c.digest()).collect();
        let len = children.iter().map(|c| c.len()).sum();
        Node::Internal {
            digest: node_digest(&digests),
            children,
            len,
        }
    }

    /// Build the canonical subtree for sorted, distinct `keys` at `depth`.
    fn build(keys: Vec<ItemKey>, depth: usize) -> Self {
        if keys.is_empty() {
            return Node::Empty;
        }
        if keys.len() <= LEAF_CAPACITY || depth >= 64 {
            return Node::leaf(keys);
        }
        let mut buckets: [Vec<ItemKey>; FANOUT] = Default::default();
        for key in keys {
            buckets[key.nibble(depth) as usize].push(key);
        }
        let children = buckets.map(|bucket| Arc::new(Node::build(bucket, depth + 1)));
        Node::internal(Box::new(children))
    }

    /// Copy-on-write insert. Returns `None` if the key is already present.
    fn insert(&self, key: ItemKey, depth: usize) -> Option<Node> {
        match self {
            Node::Empty => Some(Node::leaf(vec![key])),
            Node::Leaf { keys, .. } => {
                let pos = keys.binary_search(&key).err()?;
                let mut keys = keys.clone();
                keys.insert(pos, key);
                Some(Node::build(keys, depth))
            }
            Node::Internal { children, .. } => {
                let i = key.nibble(depth) as usize;
                let child = children[i].insert(key, depth + 1)?;
                let mut children = children.clone();
                children[i] = Arc::new(child);
                Some(Node::internal(children))
            }
        }
    }

    fn contains(&self, key: &ItemKey, depth: usize) -> bool {
        match self {
            Node::Empty => false,
            Node::Leaf { keys, .. } => keys.binary_search(key).is_ok(),
            Node::Internal { children, .. } => {
                children[key.nibble(depth) as usize].contains(key, depth + 1)
            }
        }
    }

    fn collect(&self, path: &NodePath, out: &mut Vec<ItemKey>) {
        match self {
            Node::Empty => {}
            Node::Leaf { keys, .. } => out.extend(keys.iter().filter(|k| path.covers(k))),
            Node::Internal { children, .. } => {
                for child in children.iter() {
                    child.collect(path, out);
                }
            }
        }
    }
}

/// A Merkle prefix tree over item keys.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Arc<Node>,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Node::Empty),
        }
    }

    /// Build a tree from keys in any order.
    pub fn from_keys(keys: impl IntoIterator<Item = ItemKey>) -> Self {
        let mut keys: Vec<ItemKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self {
            root: Arc::new(Node::build(keys, 0)),
        }
    }

    /// Current root digest. Zero for an empty tree.
    pub fn root_digest(&self) -> Blake3Hash {
        self.root.digest()
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: ItemKey) -> bool {
        match self.root.insert(key, 0) {
            Some(root) => {
                self.root = Arc::new(root);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.root.contains(key, 0)
    }

    /// A constant-time copy sharing all nodes with this tree.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Every key, in key order.
    pub fn keys(&self) -> Vec<ItemKey> {
        self.keys_under(&NodePath::ROOT)
    }

    /// Every key under `path`, in key order.
    pub fn keys_under(&self, path: &NodePath) -> Vec<ItemKey> {
        let (node, depth) = self.descend(path);
        let mut out = Vec::new();
        if depth == path.depth() as usize {
            node.collect(&NodePath::ROOT, &mut out);
        } else {
            node.collect(path, &mut out);
        }
        out
    }

    /// Summarize the subtree at `path`.
    pub fn summarize(&self, path: &NodePath) -> NodeSummary {
        let (node, depth) = self.descend(path);
        if depth < path.depth() as usize {
            // Stopped at a leaf above the path: the subtree is the covered keys.
            let mut keys = Vec::new();
            node.collect(path, &mut keys);
            return if keys.is_empty() {
                NodeSummary::Empty
            } else {
                NodeSummary::Leaf { keys }
            };
        }
        match node {
            Node::Empty => NodeSummary::Empty,
            Node::Leaf { keys, .. } => NodeSummary::Leaf { keys: keys.clone() },
            Node::Internal { children, .. } => NodeSummary::Internal {
                children: children.iter().map(|c| c.digest()).collect(),
            },
        }
    }

    /// Digests of the 16 children of `path`, whatever the node's form.
    pub fn child_digests(&self, path: &NodePath) -> Vec<Blake3Hash> {
        match self.summarize(path) {
            NodeSummary::Internal { children } => children,
            NodeSummary::Empty => vec![Blake3Hash::ZERO; FANOUT],
            NodeSummary::Leaf { keys } => {
                let depth = path.depth() as usize;
                let mut buckets: [Vec<ItemKey>; FANOUT] = Default::default();
                for key in keys {
                    buckets[key.nibble(depth) as usize].push(key);
                }
                buckets.iter().map(|b| leaf_digest(b)).collect()
            }
        }
    }

    /// Walk toward `path`, stopping at a non-internal node.
    fn descend(&self, path: &NodePath) -> (&Node, usize) {
        let mut node: &Node = &self.root;
        let mut depth = 0;
        while depth < path.depth() as usize {
            match node {
                Node::Internal { children, .. } => {
                    node = children[path.nibble(depth) as usize].as_ref();
                    depth += 1;
                }
                _ => break,
            }
        }
        (node, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(n: usize) -> Vec<ItemKey> {
        (0..n).map(|i| ItemKey::of(format!("item-{i}").as_bytes())).collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.root_digest(), Blake3Hash::ZERO);
        assert_eq!(tree.summarize(&NodePath::ROOT), NodeSummary::Empty);
    }

    #[test]
    fn test_insert_and_contains() {
        let mut tree = MerkleTree::new();
        for key in keys(100) {
            assert!(tree.insert(key));
        }
        assert_eq!(tree.len(), 100);
        for key in keys(100) {
            assert!(tree.contains(&key));
            assert!(!tree.insert(key));
        }
        assert!(!tree.contains(&ItemKey::of(b"absent")));
        assert_eq!(tree.keys().len(), 100);
    }

    #[test]
    fn test_duplicate_insert_keeps_root() {
        let mut tree = MerkleTree::from_keys(keys(20));
        let before = tree.root_digest();
        assert!(!tree.insert(keys(20)[7]));
        assert_eq!(tree.root_digest(), before);
    }

    #[test]
    fn test_leaf_splits_past_capacity() {
        let tree = MerkleTree::from_keys(keys(LEAF_CAPACITY));
        assert!(matches!(
            tree.summarize(&NodePath::ROOT),
            NodeSummary::Leaf { .. }
        ));

        let tree = MerkleTree::from_keys(keys(LEAF_CAPACITY + 1));
        assert!(matches!(
            tree.summarize(&NodePath::ROOT),
            NodeSummary::Internal { .. }
        ));
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let mut tree = MerkleTree::from_keys(keys(50));
        let snap = tree.snapshot();
        tree.insert(ItemKey::of(b"new"));
        assert_eq!(snap.len(), 50);
        assert_eq!(tree.len(), 51);
        assert_ne!(snap.root_digest(), tree.root_digest());
    }

    #[test]
    fn test_summary_digest_matches_tree() {
        let tree = MerkleTree::from_keys(keys(200));
        assert_eq!(
            tree.summarize(&NodePath::ROOT).digest(),
            tree.root_digest()
        );
    }

    #[test]
    fn test_summarize_inside_leaf() {
        let ks = keys(5);
        let tree = MerkleTree::from_keys(ks.clone());
        let path = NodePath::of_key(&ks[0], 1).unwrap();
        match tree.summarize(&path) {
            NodeSummary::Leaf { keys } => {
                assert!(keys.contains(&ks[0]));
                assert!(keys.iter().all(|k| path.covers(k)));
            }
            other => panic!("expected leaf, got {other:?}"),
        }
        // Same answer as a tree holding only those keys would give.
        let sub = MerkleTree::from_keys(tree.keys_under(&path));
        assert_eq!(tree.summarize(&path), sub.summarize(&path));
    }

    #[test]
    fn test_child_digests_agree_across_forms() {
        // A leaf on one side and an internal node on the other must report
        // the same child digests for shared children.
        let ks = keys(LEAF_CAPACITY + 1);
        let small = MerkleTree::from_keys(ks[..LEAF_CAPACITY].to_vec());
        let big = MerkleTree::from_keys(ks.clone());
        let extra = ks[LEAF_CAPACITY].nibble(0) as usize;
        let a = small.child_digests(&NodePath::ROOT);
        let b = big.child_digests(&NodePath::ROOT);
        for i in 0..FANOUT {
            if i != extra {
                assert_eq!(a[i], b[i], "child {i}");
            }
        }
    }

    proptest! {
        #[test]
        fn prop_order_independent(mut seeds in proptest::collection::vec(any::<u32>(), 0..120)) {
            let ks: Vec<ItemKey> = seeds.iter().map(|s| ItemKey::of(&s.to_le_bytes())).collect();
            let mut forward = MerkleTree::new();
            for k in &ks {
                forward.insert(*k);
            }
            seeds.reverse();
            let mut backward = MerkleTree::new();
            for s in &seeds {
                backward.insert(ItemKey::of(&s.to_le_bytes()));
            }
            prop_assert_eq!(forward.root_digest(), backward.root_digest());
            prop_assert_eq!(forward.root_digest(), MerkleTree::from_keys(ks).root_digest());
        }
    }
}
