//! Proptest generators for property-based testing.

use proptest::prelude::*;

use campfire_core::{
    Ed25519PublicKey, IdentityHash, Keypair, Permission, RoomId, TrustChainNode, NAME_CAPACITY,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random IdentityHash.
pub fn identity_hash() -> impl Strategy<Value = IdentityHash> {
    any::<[u8; 32]>().prop_map(IdentityHash::from_bytes)
}

/// Generate any permission bitset.
pub fn permission() -> impl Strategy<Value = Permission> {
    any::<u8>().prop_map(Permission::from_bits)
}

/// Generate a name that fits a chain node.
pub fn display_name() -> impl Strategy<Value = String> {
    let pattern = format!("[a-zA-Z0-9 _-]{{0,{NAME_CAPACITY}}}");
    proptest::string::string_regex(&pattern)
        .expect("valid regex")
        .prop_map(String::from)
}

/// Generate a named room.
pub fn room_id() -> impl Strategy<Value = RoomId> {
    prop_oneof![
        Just(RoomId::broadcast()),
        "[a-z]{1,12}".prop_map(|name| RoomId::named(&name)),
    ]
}

/// Generate message bytes of at most `max_len`.
pub fn message(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for a chain that satisfies every narrowing rule.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// One key per node, root first.
    pub keypairs: Vec<Keypair>,
    /// `(held, grantable)` per node, already narrowed.
    pub permissions: Vec<(Permission, Permission)>,
    pub names: Vec<String>,
}

impl ChainParams {
    pub fn depth(&self) -> usize {
        self.keypairs.len()
    }

    /// The leaf's keypair.
    pub fn leaf(&self) -> &Keypair {
        &self.keypairs[self.keypairs.len() - 1]
    }
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec(
            (any::<[u8; 32]>(), any::<u8>(), any::<u8>(), display_name()),
            1..=6,
        )
        .prop_map(|levels| {
            let depth = levels.len();
            let mut keypairs = Vec::with_capacity(depth);
            let mut permissions = Vec::with_capacity(depth);
            let mut names = Vec::with_capacity(depth);
            let mut parent_grantable = Permission::ALL;

            for (i, (seed, held_bits, grantable_bits, name)) in levels.into_iter().enumerate() {
                let (held, grantable) = if i == 0 {
                    (Permission::ALL, Permission::ALL)
                } else {
                    // Inner nodes must keep Invite so they can delegate further.
                    let keep = if i + 1 < depth {
                        Permission::INVITE
                    } else {
                        Permission::NONE
                    };
                    let held = (Permission::from_bits(held_bits) | keep) & parent_grantable;
                    let grantable = (Permission::from_bits(grantable_bits) | keep) & held;
                    (held, grantable)
                };
                parent_grantable = grantable;
                keypairs.push(Keypair::from_seed(&seed));
                permissions.push((held, grantable));
                names.push(name);
            }

            ChainParams {
                keypairs,
                permissions,
                names,
            }
        })
        .boxed()
    }
}

/// Build and sign the chain described by `params`.
pub fn chain_from_params(params: &ChainParams) -> Vec<TrustChainNode> {
    let mut nodes = Vec::with_capacity(params.depth());
    for i in 0..params.depth() {
        let (held, grantable) = params.permissions[i];
        let issuer = if i == 0 {
            &params.keypairs[0]
        } else {
            &params.keypairs[i - 1]
        };
        let node = TrustChainNode::issue(
            issuer,
            params.keypairs[i].public_key(),
            held,
            grantable,
            &params.names[i],
        )
        .expect("generated names fit");
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use campfire_core::validate_trust_chain;

    proptest! {
        #[test]
        fn test_generated_chains_validate(params: ChainParams) {
            let chain = chain_from_params(&params);
            prop_assert_eq!(chain.len(), params.depth());
            prop_assert!(validate_trust_chain(&chain).is_ok());
        }

        #[test]
        fn test_display_names_fit(name in display_name()) {
            prop_assert!(name.len() <= NAME_CAPACITY);
        }

        #[test]
        fn test_widening_leaf_is_rejected(params: ChainParams) {
            prop_assume!(params.depth() >= 2);
            let parent_grantable = params.permissions[params.depth() - 2].1;
            prop_assume!(parent_grantable != Permission::ALL);

            let mut chain = chain_from_params(&params);
            let parent = &params.keypairs[params.depth() - 2];
            let leaf = chain.len() - 1;
            chain[leaf] = TrustChainNode::issue(
                parent,
                params.leaf().public_key(),
                Permission::ALL,
                Permission::NONE,
                "wide",
            )
            .unwrap();
            prop_assert!(validate_trust_chain(&chain).is_err());
        }
    }
}
