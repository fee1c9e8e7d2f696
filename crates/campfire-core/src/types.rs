//! Strong type definitions for CampfireNet.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Blake3Hash, Ed25519PublicKey};

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl From<Blake3Hash> for $name {
            fn from(hash: Blake3Hash) -> Self {
                Self(hash.0)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                let arr: [u8; 32] = slice.try_into()?;
                Ok(Self(arr))
            }
        }
    };
}

digest_id!(
    /// The public-identity hash of a participant: Blake3 of its Ed25519 public key.
    ///
    /// The all-zero value is reserved as the broadcast sentinel.
    IdentityHash
);

digest_id!(
    /// Content-derived key of a log item: Blake3 of its serialized bytes.
    ///
    /// Items are positioned in the sync tree by this key.
    ItemKey
);

digest_id!(
    /// Identifier of a chat room.
    RoomId
);

impl IdentityHash {
    /// The broadcast sentinel (all zeros).
    pub const BROADCAST: Self = Self([0u8; 32]);

    /// Derive the identity hash of a public key.
    pub fn of(public_key: &Ed25519PublicKey) -> Self {
        Self(Blake3Hash::hash(public_key.as_bytes()).0)
    }

    /// Whether this is the broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl ItemKey {
    /// Compute the key of serialized item bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(Blake3Hash::hash(bytes).0)
    }

    /// The 4-bit nibble at `index` (0 = high nibble of the first byte).
    pub fn nibble(&self, index: usize) -> u8 {
        let byte = self.0[index / 2];
        if index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }
}

impl RoomId {
    /// The room every broadcast message lands in.
    pub fn broadcast() -> Self {
        Self(Blake3Hash::hash(IdentityHash::BROADCAST.as_bytes()).0)
    }

    /// A named public room.
    pub fn named(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"campfire/room/");
        hasher.update(name.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// The direct-message room between two identities. Order-independent.
    pub fn direct(a: &IdentityHash, b: &IdentityHash) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"campfire/direct/");
        hasher.update(lo.as_bytes());
        hasher.update(hi.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

/// Identifier of a physical link to a neighbor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub [u8; 16]);

impl LinkId {
    /// Generate a random link id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}
