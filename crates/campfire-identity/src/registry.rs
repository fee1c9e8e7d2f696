//! The identity registry: every trust chain node this process has validated.
//!
//! Shared by the coordinator and all neighbor connections. Readers look up
//! sender keys during envelope decode; writers only append. A later node for
//! the same identity hash replaces the earlier one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use campfire_core::{Ed25519PublicKey, IdentityHash, TrustChainNode};

/// How a registered node was learned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Installed as part of the local identity's own chain.
    OwnChain,
    /// Learned from a peer chain, validated by the named local identity.
    ValidatedBy(String),
}

/// A registered trust chain node.
#[derive(Clone, Debug)]
pub struct RegisteredIdentity {
    pub node: TrustChainNode,
    pub provenance: Provenance,
}

impl RegisteredIdentity {
    /// The identity's public key.
    pub fn public_key(&self) -> &Ed25519PublicKey {
        &self.node.this_id
    }

    /// The identity's display name.
    pub fn name(&self) -> &str {
        &self.node.name
    }
}

/// Map from identity hash to the last validated node for that identity.
#[derive(Default)]
pub struct IdentityRegistry {
    inner: RwLock<HashMap<IdentityHash, RegisteredIdentity>>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one node.
    pub fn add_identity(&self, node: TrustChainNode, provenance: Provenance) {
        let hash = node.identity_hash();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.insert(hash, RegisteredIdentity { node, provenance });
    }

    /// Register every node of a validated chain under one write lock.
    pub fn add_identities<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a TrustChainNode>,
        provenance: Provenance,
    ) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for node in nodes {
            inner.insert(
                node.identity_hash(),
                RegisteredIdentity {
                    node: node.clone(),
                    provenance: provenance.clone(),
                },
            );
        }
    }

    /// Look up a registered identity.
    pub fn lookup(&self, hash: &IdentityHash) -> Option<RegisteredIdentity> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(hash).cloned()
    }

    /// Look up only the public key.
    pub fn public_key(&self, hash: &IdentityHash) -> Option<Ed25519PublicKey> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(hash).map(|r| r.node.this_id)
    }

    /// Whether an identity is registered.
    pub fn contains(&self, hash: &IdentityHash) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.contains_key(hash)
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("len", &self.len())
            .finish()
    }
}
