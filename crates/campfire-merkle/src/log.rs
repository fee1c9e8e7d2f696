//! The deduplicating item log that backs the sync tree.

use std::collections::HashMap;

use campfire_core::{Blake3Hash, ItemKey};

use crate::tree::MerkleTree;

/// How items of type `T` are turned into bytes.
///
/// Serialization must be deterministic: the item key is the Blake3 hash of
/// these bytes.
pub trait ItemOperations<T>: Send + Sync {
    fn serialize(&self, item: &T) -> Vec<u8>;
}

/// Result of inserting an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Item was appended.
    Inserted(ItemKey),
    /// Item was already in the log (idempotent, not an error).
    AlreadyExists(ItemKey),
}

impl InsertResult {
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Inserted(k) | Self::AlreadyExists(k) => *k,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// An append-only log of distinct items, indexed by key.
pub struct ItemLog<T, O> {
    ops: O,
    items: HashMap<ItemKey, T>,
    order: Vec<ItemKey>,
    tree: MerkleTree,
}

impl<T, O: ItemOperations<T>> ItemLog<T, O> {
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            items: HashMap::new(),
            order: Vec::new(),
            tree: MerkleTree::new(),
        }
    }

    /// The key an item would be stored under.
    pub fn key_of(&self, item: &T) -> ItemKey {
        ItemKey::of(&self.ops.serialize(item))
    }

    /// Append an item unless an identical one is present.
    pub fn insert(&mut self, item: T) -> InsertResult {
        let key = self.key_of(&item);
        if self.items.contains_key(&key) {
            return InsertResult::AlreadyExists(key);
        }
        self.tree.insert(key);
        self.items.insert(key, item);
        self.order.push(key);
        InsertResult::Inserted(key)
    }

    pub fn get(&self, key: &ItemKey) -> Option<&T> {
        self.items.get(key)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[ItemKey] {
        &self.order
    }

    /// Items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, &T)> {
        self.order
            .iter()
            .filter_map(move |k| self.items.get(k).map(|item| (k, item)))
    }

    pub fn root_digest(&self) -> Blake3Hash {
        self.tree.root_digest()
    }

    /// A constant-time snapshot of the tree for diffing.
    pub fn snapshot(&self) -> MerkleTree {
        self.tree.snapshot()
    }
}
