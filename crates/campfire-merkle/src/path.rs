//! Node addressing in the 16-way prefix tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use campfire_core::ItemKey;

/// Children per internal node.
pub const FANOUT: usize = 16;

/// Deepest possible path: one nibble per key nibble.
pub const MAX_DEPTH: u8 = 64;

/// The position of a subtree: the first `depth` nibbles of a key prefix.
///
/// Nibbles past `depth` are always zero, so equal paths compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath {
    depth: u8,
    prefix: [u8; 32],
}

impl NodePath {
    /// The root path.
    pub const ROOT: Self = Self {
        depth: 0,
        prefix: [0u8; 32],
    };

    /// Build a path, clearing any nibbles past `depth`. Returns `None` if
    /// `depth` exceeds [`MAX_DEPTH`].
    pub fn new(depth: u8, prefix: [u8; 32]) -> Option<Self> {
        if depth > MAX_DEPTH {
            return None;
        }
        let mut path = Self { depth, prefix };
        path.clear_tail();
        Some(path)
    }

    /// The path of the subtree at `depth` that contains `key`.
    pub fn of_key(key: &ItemKey, depth: u8) -> Option<Self> {
        Self::new(depth, *key.as_bytes())
    }

    fn clear_tail(&mut self) {
        let d = self.depth as usize;
        if d % 2 == 1 {
            self.prefix[d / 2] &= 0xF0;
        }
        for byte in self.prefix.iter_mut().skip(d.div_ceil(2)) {
            *byte = 0;
        }
    }

    /// Whether nibbles past `depth` are zero and `depth` is in range.
    ///
    /// Always true for locally built paths; checked on paths from peers.
    pub fn is_canonical(&self) -> bool {
        match Self::new(self.depth, self.prefix) {
            Some(p) => p == *self,
            None => false,
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The nibble at `index`, for `index < depth`.
    pub fn nibble(&self, index: usize) -> u8 {
        let byte = self.prefix[index / 2];
        if index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }

    /// The child path one nibble deeper.
    pub fn child(&self, nibble: u8) -> Option<Self> {
        if self.depth >= MAX_DEPTH || nibble as usize >= FANOUT {
            return None;
        }
        let mut prefix = self.prefix;
        let d = self.depth as usize;
        if d % 2 == 0 {
            prefix[d / 2] |= nibble << 4;
        } else {
            prefix[d / 2] |= nibble;
        }
        Some(Self {
            depth: self.depth + 1,
            prefix,
        })
    }

    /// Whether `key` lies under this path.
    pub fn covers(&self, key: &ItemKey) -> bool {
        (0..self.depth as usize).all(|i| key.nibble(i) == self.nibble(i))
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({self})")
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            return write!(f, "/");
        }
        for i in 0..self.depth as usize {
            write!(f, "{:x}", self.nibble(i))?;
        }
        Ok(())
    }
}
