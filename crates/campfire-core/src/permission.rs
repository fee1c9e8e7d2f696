//! Permission bitsets carried by trust chain nodes.
//!
//! Permissions narrow monotonically down a chain: a node can hold at most
//! what its parent may grant, and may grant at most what it holds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// A set of capabilities, stored as a single byte on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permission(u8);

impl Permission {
    /// No capabilities.
    pub const NONE: Self = Self(0x00);
    /// May delegate trust chains to new members.
    pub const INVITE: Self = Self(0x01);
    /// May post messages.
    pub const POST: Self = Self(0x02);
    /// Every capability, including ones not yet defined.
    pub const ALL: Self = Self(0xFF);

    /// Construct from the wire byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The wire byte.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether every capability in `other` is also in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` is a subset of `other`.
    pub const fn is_subset_of(&self, other: Self) -> bool {
        other.contains(*self)
    }

    /// Whether no capability is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Permission {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permission({self})")
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => return write!(f, "None"),
            Self::ALL => return write!(f, "All"),
            _ => {}
        }
        let mut names = Vec::new();
        if self.contains(Self::INVITE) {
            names.push("Invite".to_string());
        }
        if self.contains(Self::POST) {
            names.push("Post".to_string());
        }
        let rest = self.0 & !(Self::INVITE.0 | Self::POST.0);
        if rest != 0 {
            names.push(format!("{rest:#04x}"));
        }
        write!(f, "{}", names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_contains_everything() {
        assert!(Permission::ALL.contains(Permission::INVITE));
        assert!(Permission::ALL.contains(Permission::POST));
        assert!(Permission::ALL.contains(Permission::NONE));
        assert!(!Permission::POST.contains(Permission::INVITE));
    }

    #[test]
    fn test_display() {
        assert_eq!(Permission::NONE.to_string(), "None");
        assert_eq!(Permission::ALL.to_string(), "All");
        assert_eq!(
            (Permission::INVITE | Permission::POST).to_string(),
            "Invite|Post"
        );
        assert_eq!(Permission::from_bits(0x06).to_string(), "Post|0x04");
    }

    proptest! {
        #[test]
        fn prop_subset_matches_bits(a: u8, b: u8) {
            let pa = Permission::from_bits(a);
            let pb = Permission::from_bits(b);
            prop_assert_eq!(pa.is_subset_of(pb), a & !b == 0);
        }

        #[test]
        fn prop_intersection_is_subset(a: u8, b: u8) {
            let i = Permission::from_bits(a) & Permission::from_bits(b);
            prop_assert!(i.is_subset_of(Permission::from_bits(a)));
            prop_assert!(i.is_subset_of(Permission::from_bits(b)));
        }
    }
}
