//! Trust chain codec.
//!
//! A trust chain is an ordered list of delegation links from a self-signed
//! root to a leaf identity. Each link is a fixed-size node:
//!
//! ```text
//! [parentId:32][thisId:32][held:1][grantable:1][nameLength:1][name:63][signature:64]
//! ```
//!
//! The signature covers everything before it, prefixed with a domain tag,
//! and is made by the parent's key. A chain on the wire is the concatenation
//! of its nodes, root first.
//!
//! Narrowing rule, enforced for every node after the root:
//! - held permissions are a subset of the parent's grantable permissions
//! - grantable permissions are a subset of the node's own held permissions
//! - the parent holds `Invite`

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::{ChainError, CoreError};
use crate::permission::Permission;
use crate::types::IdentityHash;

/// Domain tag prefixed to every signed chain link.
pub const CHAIN_LINK_DOMAIN: &[u8] = b"campfire/chain-link/v1";

/// Maximum name length in bytes.
pub const NAME_CAPACITY: usize = 63;

/// Length of the signed portion of a node.
const SIGNED_LEN: usize = PUBLIC_KEY_SIZE * 2 + 3 + NAME_CAPACITY;

/// Serialized size of one node.
pub const NODE_SIZE: usize = SIGNED_LEN + SIGNATURE_SIZE;

/// One delegation link in a trust chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustChainNode {
    /// Public key of the issuer. Equal to `this_id` for a root.
    pub parent_id: Ed25519PublicKey,
    /// Public key of the identity this link admits.
    pub this_id: Ed25519PublicKey,
    /// Capabilities the identity holds.
    pub held: Permission,
    /// Capabilities the identity may delegate.
    pub grantable: Permission,
    /// Display name, at most [`NAME_CAPACITY`] bytes of UTF-8.
    pub name: String,
    /// Signature over the link by `parent_id`.
    pub signature: Ed25519Signature,
}

impl TrustChainNode {
    /// Create and sign a link issued by `issuer` for `this_id`.
    pub fn issue(
        issuer: &Keypair,
        this_id: Ed25519PublicKey,
        held: Permission,
        grantable: Permission,
        name: &str,
    ) -> Result<Self, CoreError> {
        check_name(name)?;
        let mut node = Self {
            parent_id: issuer.public_key(),
            this_id,
            held,
            grantable,
            name: name.to_string(),
            signature: Ed25519Signature::ZERO,
        };
        node.signature = issuer.sign(&node.signed_message());
        Ok(node)
    }

    /// Create a self-signed root link holding and granting `All`.
    pub fn root(keypair: &Keypair, name: &str) -> Result<Self, CoreError> {
        Self::issue(
            keypair,
            keypair.public_key(),
            Permission::ALL,
            Permission::ALL,
            name,
        )
    }

    /// Identity hash of the admitted identity.
    pub fn identity_hash(&self) -> IdentityHash {
        IdentityHash::of(&self.this_id)
    }

    /// Whether this link is self-issued.
    pub fn is_self_issued(&self) -> bool {
        self.parent_id == self.this_id
    }

    /// The bytes covered by the signature.
    pub fn signed_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(CHAIN_LINK_DOMAIN.len() + SIGNED_LEN);
        msg.extend_from_slice(CHAIN_LINK_DOMAIN);
        msg.extend_from_slice(&self.signed_fields());
        msg
    }

    /// Verify the signature under the parent key.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        self.parent_id
            .verify(&self.signed_message(), &self.signature)
    }

    fn signed_fields(&self) -> [u8; SIGNED_LEN] {
        let mut out = [0u8; SIGNED_LEN];
        out[..32].copy_from_slice(self.parent_id.as_bytes());
        out[32..64].copy_from_slice(self.this_id.as_bytes());
        out[64] = self.held.bits();
        out[65] = self.grantable.bits();
        let name = self.name.as_bytes();
        // Over-long names are rejected at construction; truncate hand-built ones.
        let len = name.len().min(NAME_CAPACITY);
        out[66] = len as u8;
        out[67..67 + len].copy_from_slice(&name[..len]);
        out
    }

    /// Serialize to the fixed node layout.
    pub fn to_bytes(&self) -> [u8; NODE_SIZE] {
        let mut out = [0u8; NODE_SIZE];
        out[..SIGNED_LEN].copy_from_slice(&self.signed_fields());
        out[SIGNED_LEN..].copy_from_slice(self.signature.as_bytes());
        out
    }

    /// Parse one node. `index` is reported in errors.
    pub fn from_bytes(bytes: &[u8], index: usize) -> Result<Self, ChainError> {
        if bytes.len() != NODE_SIZE {
            return Err(ChainError::MalformedLength(bytes.len()));
        }
        let mut parent = [0u8; 32];
        parent.copy_from_slice(&bytes[..32]);
        let mut this = [0u8; 32];
        this.copy_from_slice(&bytes[32..64]);

        let name_len = bytes[66] as usize;
        if name_len > NAME_CAPACITY {
            return Err(ChainError::MalformedName { index });
        }
        let name = std::str::from_utf8(&bytes[67..67 + name_len])
            .map_err(|_| ChainError::MalformedName { index })?
            .to_string();
        // Padding must be zero so each node has exactly one encoding.
        if bytes[67 + name_len..SIGNED_LEN].iter().any(|&b| b != 0) {
            return Err(ChainError::MalformedName { index });
        }

        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[SIGNED_LEN..]);

        Ok(Self {
            parent_id: Ed25519PublicKey::from_bytes(parent),
            this_id: Ed25519PublicKey::from_bytes(this),
            held: Permission::from_bits(bytes[64]),
            grantable: Permission::from_bits(bytes[65]),
            name,
            signature: Ed25519Signature::from_bytes(sig),
        })
    }
}

/// Check a display name fits the node's name field.
pub fn check_name(name: &str) -> Result<(), CoreError> {
    if name.len() > NAME_CAPACITY {
        return Err(CoreError::NameTooLong {
            len: name.len(),
            max: NAME_CAPACITY,
        });
    }
    Ok(())
}

/// Split a chain blob into nodes. Does not validate signatures.
pub fn segment_chain(bytes: &[u8]) -> Result<Vec<TrustChainNode>, ChainError> {
    if bytes.is_empty() {
        return Err(ChainError::Empty);
    }
    if bytes.len() % NODE_SIZE != 0 {
        return Err(ChainError::MalformedLength(bytes.len()));
    }
    bytes
        .chunks_exact(NODE_SIZE)
        .enumerate()
        .map(|(i, chunk)| TrustChainNode::from_bytes(chunk, i))
        .collect()
}

/// Concatenate nodes into a chain blob.
pub fn serialize_chain(nodes: &[TrustChainNode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * NODE_SIZE);
    for node in nodes {
        out.extend_from_slice(&node.to_bytes());
    }
    out
}

/// Validate a chain's continuity, signatures, and permission narrowing.
pub fn validate_trust_chain(nodes: &[TrustChainNode]) -> Result<(), ChainError> {
    let root = nodes.first().ok_or(ChainError::Empty)?;

    if !root.is_self_issued() {
        return Err(ChainError::RootNotSelfIssued);
    }
    if root.held != Permission::ALL || root.grantable != Permission::ALL {
        return Err(ChainError::RootNotAll {
            held: root.held,
            grantable: root.grantable,
        });
    }
    root.verify_signature()
        .map_err(|_| ChainError::BadSignature { index: 0 })?;

    for (index, pair) in nodes.windows(2).enumerate() {
        let (parent, node) = (&pair[0], &pair[1]);
        let index = index + 1;

        if node.parent_id != parent.this_id {
            return Err(ChainError::BrokenContinuity { index });
        }
        if !parent.held.contains(Permission::INVITE) {
            return Err(ChainError::ParentCannotInvite { index });
        }
        if !node.held.is_subset_of(parent.grantable) {
            return Err(ChainError::HeldExceedsParentGrantable {
                index,
                held: node.held,
                parent_grantable: parent.grantable,
            });
        }
        if !node.grantable.is_subset_of(node.held) {
            return Err(ChainError::GrantableExceedsHeld {
                index,
                grantable: node.grantable,
                held: node.held,
            });
        }
        node.verify_signature()
            .map_err(|_| ChainError::BadSignature { index })?;
    }

    Ok(())
}
