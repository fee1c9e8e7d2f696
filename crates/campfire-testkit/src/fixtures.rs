//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a small network rooted at one
//! node, with every other node holding a chain delegated by the root.

use std::sync::Arc;
use std::time::Duration;

use campfire_core::{Keypair, Permission};
use campfire_identity::Identity;
use campfire_net::{ConnectionHandle, MeshConfig, MeshCoordinator};
use campfire_sync::memory::MemoryLink;
use campfire_sync::SyncConfig;

/// An identity with a deterministic key.
pub fn seeded_identity(index: u8, name: &str) -> Identity {
    let mut seed = [0u8; 32];
    seed[0] = index;
    seed[31] = 0xCF;
    Identity::new(Keypair::from_seed(&seed), name)
}

/// Connection timings short enough for tests.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig {
        handshake_timeout: Duration::from_secs(2),
        sync_timeout: Duration::from_secs(10),
        relay_interval: Duration::from_millis(20),
        ..SyncConfig::default()
    }
}

/// Mesh settings using [`fast_sync_config`].
pub fn mesh_config(name: &str) -> MeshConfig {
    MeshConfig {
        sync: fast_sync_config(),
        ..MeshConfig::named(name)
    }
}

/// A root node and the members it delegated to.
pub struct TestNetwork {
    pub root: Arc<MeshCoordinator>,
    pub members: Vec<Arc<MeshCoordinator>>,
}

impl TestNetwork {
    /// A root plus `members` nodes holding `Post`.
    pub fn new(members: usize) -> Self {
        Self::with_permissions(members, Permission::POST, Permission::NONE)
    }

    /// A root plus `members` nodes with the given delegation.
    pub fn with_permissions(members: usize, held: Permission, grantable: Permission) -> Self {
        let root = MeshCoordinator::new(seeded_identity(0, "root"), mesh_config("root"));
        root.generate_root_chain().expect("root chain");

        let members = (1..=members)
            .map(|i| {
                let name = format!("member-{i}");
                let identity = seeded_identity(i as u8, &name);
                let chain = root
                    .generate_new_chain(identity.public_key(), held, grantable, &name)
                    .expect("delegation");
                let node = MeshCoordinator::new(identity, mesh_config(&name));
                node.add_trust_chain(&chain).expect("install chain");
                node
            })
            .collect();

        Self { root, members }
    }

    /// Node `index`, where 0 is the root.
    pub fn node(&self, index: usize) -> &Arc<MeshCoordinator> {
        if index == 0 {
            &self.root
        } else {
            &self.members[index - 1]
        }
    }

    /// Every node, root first.
    pub fn nodes(&self) -> Vec<Arc<MeshCoordinator>> {
        std::iter::once(&self.root)
            .chain(self.members.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Cancel every connection on every node.
    pub fn shutdown(&self) {
        for node in self.nodes() {
            node.shutdown();
        }
    }
}

/// Join two nodes with an in-memory link.
///
/// Must be called inside a tokio runtime.
pub fn connect(
    a: &Arc<MeshCoordinator>,
    b: &Arc<MeshCoordinator>,
) -> (ConnectionHandle, ConnectionHandle) {
    let (link_a, link_b) = MemoryLink::pair();
    (a.attach(Arc::new(link_a)), b.attach(Arc::new(link_b)))
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campfire_net::ConnectionState;

    #[test]
    fn test_seeded_identity_is_deterministic() {
        let a = seeded_identity(3, "a");
        let b = seeded_identity(3, "b");
        let c = seeded_identity(4, "a");
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_network_shares_one_root() {
        let net = TestNetwork::new(3);
        assert_eq!(net.len(), 4);

        let root_chain = net.root.chain_bytes();
        for member in &net.members {
            assert!(member.has_chain());
            assert_eq!(member.permissions(), (Permission::POST, Permission::NONE));
            assert!(member.chain_bytes().starts_with(&root_chain));
        }
    }

    #[tokio::test]
    async fn test_connect_reaches_relaying() {
        let net = TestNetwork::new(1);
        let (a, b) = connect(net.node(0), net.node(1));

        assert!(eventually(Duration::from_secs(5), || {
            a.state() == ConnectionState::Relaying && b.state() == ConnectionState::Relaying
        })
        .await);
        net.shutdown();
    }
}
