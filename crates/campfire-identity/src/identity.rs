//! The local identity: a private key, its trust chain, and the envelope codec.
//!
//! The identity never owns the registry. Operations that register or look up
//! nodes borrow it for the duration of the call.

use std::path::Path;

use bytes::Bytes;

use campfire_core::chain::check_name;
use campfire_core::{
    segment_chain, serialize_chain, validate_trust_chain, ChainError, Ed25519PublicKey, Envelope,
    IdentityHash, Keypair, Permission, TrustChainNode,
};

use crate::crypto::{open, seal};
use crate::error::{IdentityError, Result};
use crate::registry::{IdentityRegistry, Provenance};

/// A payload that passed signature checks and, for unicast, decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPayload {
    pub sender: IdentityHash,
    /// Name from the sender's registered chain node.
    pub sender_name: String,
    pub payload: Bytes,
    /// Whether the envelope was addressed to this identity alone.
    pub unicast: bool,
}

/// A local actor's cryptographic persona.
pub struct Identity {
    keypair: Keypair,
    public_key: Ed25519PublicKey,
    hash: IdentityHash,
    name: String,
    chain: Vec<TrustChainNode>,
    held: Permission,
    grantable: Permission,
}

impl Identity {
    /// Wrap an existing keypair. The identity starts with no chain.
    pub fn new(keypair: Keypair, name: impl Into<String>) -> Self {
        let public_key = keypair.public_key();
        Self {
            hash: IdentityHash::of(&public_key),
            public_key,
            keypair,
            name: name.into(),
            chain: Vec::new(),
            held: Permission::NONE,
            grantable: Permission::NONE,
        }
    }

    /// Create an identity with a fresh random key.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(Keypair::generate(), name)
    }

    /// Restore an identity from a key written by [`Identity::save_key`].
    pub fn load_key(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let data = std::fs::read(path)?;
        let seed: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::BadKeySize {
                expected: 32,
                got: data.len(),
            })?;
        Ok(Self::new(Keypair::from_seed(&seed), name))
    }

    /// Write the raw private key seed to `path`.
    pub fn save_key(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.keypair.seed())?;
        Ok(())
    }

    pub fn public_key(&self) -> &Ed25519PublicKey {
        &self.public_key
    }

    pub fn hash(&self) -> IdentityHash {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn held(&self) -> Permission {
        self.held
    }

    pub fn grantable(&self) -> Permission {
        self.grantable
    }

    /// The installed chain, root first. Empty until one is installed.
    pub fn chain(&self) -> &[TrustChainNode] {
        &self.chain
    }

    /// Whether a chain is installed.
    pub fn has_chain(&self) -> bool {
        !self.chain.is_empty()
    }

    /// The installed chain in wire form.
    pub fn chain_bytes(&self) -> Bytes {
        Bytes::from(serialize_chain(&self.chain))
    }

    /// The root of the installed chain.
    pub fn root(&self) -> Option<&TrustChainNode> {
        self.chain.first()
    }

    // ─── Trust chains ────────────────────────────────────────────────

    /// Create a self-signed root chain holding and granting `All`, and install it.
    ///
    /// Returns the serialized chain.
    pub fn generate_root_chain(&mut self, registry: &IdentityRegistry) -> Result<Bytes> {
        let root = TrustChainNode::root(&self.keypair, &self.name)?;
        let bytes = serialize_chain(&[root]);
        self.add_trust_chain(&bytes, registry)?;
        Ok(Bytes::from(bytes))
    }

    /// Validate a chain ending at this identity and install it.
    ///
    /// On success every node is registered. On failure nothing changes.
    pub fn add_trust_chain(&mut self, bytes: &[u8], registry: &IdentityRegistry) -> Result<()> {
        let nodes = segment_chain(bytes)?;
        validate_trust_chain(&nodes)?;

        let leaf = nodes.last().ok_or(ChainError::Empty)?;
        if leaf.this_id != self.public_key {
            return Err(ChainError::WrongTerminal.into());
        }

        self.held = leaf.held;
        self.grantable = leaf.grantable;
        registry.add_identities(&nodes, Provenance::OwnChain);
        tracing::debug!(
            identity = %self.hash,
            depth = nodes.len(),
            held = %self.held,
            "installed trust chain"
        );
        self.chain = nodes;
        Ok(())
    }

    /// Whether this identity may issue a link with the given permissions.
    pub fn can_grant_permissions(&self, held: Permission, grantable: Permission) -> bool {
        self.held.contains(Permission::INVITE)
            && held.is_subset_of(self.grantable)
            && grantable.is_subset_of(held)
    }

    /// Extend this identity's chain with a new link for `child`.
    ///
    /// Returns the serialized extended chain, to be handed to the child.
    pub fn generate_new_chain(
        &self,
        child: &Ed25519PublicKey,
        held: Permission,
        grantable: Permission,
        name: &str,
    ) -> Result<Bytes> {
        if !self.has_chain() {
            return Err(IdentityError::NoTrustChain);
        }
        if !self.can_grant_permissions(held, grantable) {
            return Err(IdentityError::Unauthorized { held, grantable });
        }
        check_name(name)?;

        let link = TrustChainNode::issue(&self.keypair, *child, held, grantable, name)?;
        let mut bytes = serialize_chain(&self.chain);
        bytes.extend_from_slice(&link.to_bytes());
        Ok(Bytes::from(bytes))
    }

    /// Validate a peer's chain bytes and register its nodes. Never fails loudly.
    pub fn validate_and_add(&self, bytes: &[u8], registry: &IdentityRegistry) -> bool {
        match segment_chain(bytes) {
            Ok(nodes) => self.validate_and_add_nodes(&nodes, registry),
            Err(e) => {
                tracing::debug!(error = %e, "rejected malformed peer chain");
                false
            }
        }
    }

    /// Validate already-segmented peer nodes and register them.
    pub fn validate_and_add_nodes(
        &self,
        nodes: &[TrustChainNode],
        registry: &IdentityRegistry,
    ) -> bool {
        match self.admit_nodes(nodes, registry) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "rejected peer chain");
                false
            }
        }
    }

    /// Validate a peer's chain, require it to end at `claimed`, and register it.
    ///
    /// Returns the peer's leaf node.
    pub fn admit_peer_chain(
        &self,
        bytes: &[u8],
        claimed: &IdentityHash,
        registry: &IdentityRegistry,
    ) -> Result<TrustChainNode> {
        let nodes = segment_chain(bytes)?;
        let leaf = nodes.last().ok_or(ChainError::Empty)?.clone();
        if leaf.identity_hash() != *claimed {
            return Err(ChainError::WrongTerminal.into());
        }
        self.admit_nodes(&nodes, registry)?;
        Ok(leaf)
    }

    fn admit_nodes(&self, nodes: &[TrustChainNode], registry: &IdentityRegistry) -> Result<()> {
        validate_trust_chain(nodes)?;
        let ours = self.root().ok_or(IdentityError::NoTrustChain)?;
        let theirs = nodes.first().ok_or(ChainError::Empty)?;
        if ours.this_id != theirs.this_id {
            return Err(ChainError::ForeignRoot.into());
        }
        registry.add_identities(nodes, Provenance::ValidatedBy(self.name.clone()));
        Ok(())
    }

    // ─── Envelopes ───────────────────────────────────────────────────

    /// Encode a message as a signed envelope.
    ///
    /// With no recipient the payload travels in plaintext to the broadcast
    /// channel. With a recipient key, `senderHash ‖ message` is sealed to it.
    pub fn encode_packet(&self, message: &[u8], recipient: Option<&[u8]>) -> Result<Envelope> {
        let (recipient_hash, payload) = match recipient {
            None => (IdentityHash::BROADCAST, Bytes::copy_from_slice(message)),
            Some(key) => {
                let key = Ed25519PublicKey::from_slice(key)?;
                let mut inner = Vec::with_capacity(32 + message.len());
                inner.extend_from_slice(self.hash.as_bytes());
                inner.extend_from_slice(message);
                let sealed = seal(key.to_montgomery_bytes()?, &inner)?;
                (IdentityHash::of(&key), Bytes::from(sealed))
            }
        };
        Ok(Envelope::sign(
            &self.keypair,
            self.hash,
            recipient_hash,
            payload,
        ))
    }

    /// Check an envelope's sender and signature without reading its payload.
    pub fn verify_envelope(envelope: &Envelope, registry: &IdentityRegistry) -> Result<()> {
        let sender = registry
            .public_key(&envelope.sender)
            .ok_or(IdentityError::UnknownSender(envelope.sender))?;
        envelope
            .verify(&sender)
            .map_err(|_| IdentityError::VerificationFailed)
    }

    /// Authenticate and, for unicast, decrypt an envelope.
    ///
    /// Returns `Ok(None)` for envelopes addressed to someone else.
    pub fn try_decode_payload(
        &self,
        envelope: &Envelope,
        registry: &IdentityRegistry,
    ) -> Result<Option<DecodedPayload>> {
        let unicast = envelope.recipient == self.hash;
        if !unicast && !envelope.is_broadcast() {
            return Ok(None);
        }

        let sender = registry
            .lookup(&envelope.sender)
            .ok_or(IdentityError::UnknownSender(envelope.sender))?;
        envelope
            .verify(sender.public_key())
            .map_err(|_| IdentityError::VerificationFailed)?;

        let payload = if unicast {
            let inner = open(self.keypair.agreement_secret_bytes(), &envelope.payload)?;
            if inner.len() < 32 || inner[..32] != envelope.sender.as_bytes()[..] {
                return Err(IdentityError::SenderMismatch);
            }
            Bytes::copy_from_slice(&inner[32..])
        } else {
            envelope.payload.clone()
        };

        Ok(Some(DecodedPayload {
            sender: envelope.sender,
            sender_name: sender.node.name,
            payload,
            unicast,
        }))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .field("held", &self.held)
            .field("grantable", &self.grantable)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campfire_core::NODE_SIZE;
    use proptest::prelude::*;

    /// A root, and a member admitted by it, sharing one registry.
    fn network(
        member_held: Permission,
        member_grantable: Permission,
    ) -> (IdentityRegistry, Identity, Identity) {
        let registry = IdentityRegistry::new();
        let mut root = Identity::generate("root");
        root.generate_root_chain(&registry).unwrap();

        let mut member = Identity::generate("member");
        let chain = root
            .generate_new_chain(member.public_key(), member_held, member_grantable, "member")
            .unwrap();
        member.add_trust_chain(&chain, &registry).unwrap();
        (registry, root, member)
    }

    #[test]
    fn test_root_chain_holds_all() {
        let registry = IdentityRegistry::new();
        let mut id = Identity::generate("alice");
        let bytes = id.generate_root_chain(&registry).unwrap();

        assert_eq!(bytes.len(), NODE_SIZE);
        assert_eq!(id.held(), Permission::ALL);
        assert_eq!(id.grantable(), Permission::ALL);
        assert!(registry.contains(&id.hash()));

        // Re-installing the same chain is accepted.
        id.add_trust_chain(&bytes, &registry).unwrap();
        assert_eq!(id.held(), Permission::ALL);
    }

    #[test]
    fn test_root_name_too_long() {
        let registry = IdentityRegistry::new();
        let mut id = Identity::generate("x".repeat(64));
        assert!(matches!(
            id.generate_root_chain(&registry),
            Err(IdentityError::NameTooLong { len: 64, max: 63 })
        ));
        assert!(!id.has_chain());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delegation_installs_member_chain() {
        let (registry, _root, member) =
            network(Permission::INVITE | Permission::POST, Permission::POST);
        assert_eq!(member.chain().len(), 2);
        assert_eq!(member.held(), Permission::INVITE | Permission::POST);
        assert_eq!(member.grantable(), Permission::POST);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_chain_for_someone_else_rejected() {
        let registry = IdentityRegistry::new();
        let mut root = Identity::generate("root");
        root.generate_root_chain(&registry).unwrap();
        let mut intended = Identity::generate("intended");
        let mut thief = Identity::generate("thief");

        let chain = root
            .generate_new_chain(intended.public_key(), Permission::POST, Permission::NONE, "i")
            .unwrap();
        assert!(matches!(
            thief.add_trust_chain(&chain, &registry),
            Err(IdentityError::Chain(ChainError::WrongTerminal))
        ));
        assert!(!thief.has_chain());
        intended.add_trust_chain(&chain, &registry).unwrap();
    }

    #[test]
    fn test_unauthorized_delegation_rejected() {
        let (_registry, _root, member) = network(Permission::POST, Permission::POST);
        let child = Keypair::generate().public_key();
        let result = member.generate_new_chain(&child, Permission::INVITE, Permission::NONE, "c");
        assert!(matches!(result, Err(IdentityError::Unauthorized { .. })));
    }

    #[test]
    fn test_delegation_requires_chain() {
        let id = Identity::generate("lonely");
        let child = Keypair::generate().public_key();
        assert!(matches!(
            id.generate_new_chain(&child, Permission::NONE, Permission::NONE, "c"),
            Err(IdentityError::NoTrustChain)
        ));
    }

    #[test]
    fn test_can_grant_checks_both_directions() {
        let (_registry, _root, member) =
            network(Permission::INVITE | Permission::POST, Permission::POST);
        assert!(member.can_grant_permissions(Permission::POST, Permission::POST));
        assert!(member.can_grant_permissions(Permission::POST, Permission::NONE));
        // held beyond own grantable
        assert!(!member.can_grant_permissions(Permission::INVITE, Permission::NONE));
        // grantable beyond requested held
        assert!(!member.can_grant_permissions(Permission::NONE, Permission::POST));
    }

    #[test]
    fn test_validate_and_add_requires_same_root() {
        let (registry, root, member) = network(Permission::POST, Permission::NONE);

        let other_registry = IdentityRegistry::new();
        let mut other_root = Identity::generate("other");
        let foreign = other_root.generate_root_chain(&other_registry).unwrap();

        assert!(!member.validate_and_add(&foreign, &registry));
        assert!(root.validate_and_add(&member.chain_bytes(), &registry));
        assert!(!root.validate_and_add(&[1, 2, 3], &registry));
        assert!(!registry.contains(&other_root.hash()));
    }

    #[test]
    fn test_validate_and_add_tags_provenance() {
        let registry_a = IdentityRegistry::new();
        let mut root = Identity::generate("root");
        let root_chain = root.generate_root_chain(&registry_a).unwrap();

        let mut member = Identity::generate("member");
        let chain = root
            .generate_new_chain(member.public_key(), Permission::POST, Permission::NONE, "member")
            .unwrap();
        member.add_trust_chain(&chain, &registry_a).unwrap();

        // A second peer only knows the root.
        let registry_b = IdentityRegistry::new();
        let mut peer = Identity::generate("peer");
        let peer_chain = root
            .generate_new_chain(peer.public_key(), Permission::POST, Permission::NONE, "peer")
            .unwrap();
        peer.add_trust_chain(&peer_chain, &registry_b).unwrap();
        assert!(!registry_b.contains(&member.hash()));

        assert!(peer.validate_and_add(&chain, &registry_b));
        let found = registry_b.lookup(&member.hash()).unwrap();
        assert_eq!(found.provenance, Provenance::ValidatedBy("peer".into()));
        assert_eq!(root_chain.len(), NODE_SIZE);
    }

    #[test]
    fn test_admit_peer_chain_checks_claim() {
        let (registry, root, member) = network(Permission::POST, Permission::NONE);
        let leaf = root
            .admit_peer_chain(&member.chain_bytes(), &member.hash(), &registry)
            .unwrap();
        assert_eq!(leaf.this_id, *member.public_key());

        assert!(matches!(
            root.admit_peer_chain(&member.chain_bytes(), &root.hash(), &registry),
            Err(IdentityError::Chain(ChainError::WrongTerminal))
        ));
    }

    #[test]
    fn test_broadcast_round_trip() {
        let (registry, root, member) = network(Permission::POST, Permission::NONE);
        let env = root.encode_packet(b"hello", None).unwrap();
        assert!(env.is_broadcast());

        let decoded = member.try_decode_payload(&env, &registry).unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"hello");
        assert_eq!(decoded.sender, root.hash());
        assert_eq!(decoded.sender_name, "root");
        assert!(!decoded.unicast);
    }

    #[test]
    fn test_unicast_round_trip() {
        let (registry, root, member) = network(Permission::POST, Permission::NONE);
        let env = root
            .encode_packet(b"psst", Some(member.public_key().as_bytes()))
            .unwrap();
        assert_eq!(env.recipient, member.hash());
        assert_ne!(&env.payload[..], b"psst");

        let decoded = member.try_decode_payload(&env, &registry).unwrap().unwrap();
        assert_eq!(&decoded.payload[..], b"psst");
        assert!(decoded.unicast);

        // Not addressed to root.
        assert!(root.try_decode_payload(&env, &registry).unwrap().is_none());
    }

    #[test]
    fn test_encode_bad_key_size() {
        let id = Identity::generate("a");
        assert!(matches!(
            id.encode_packet(b"x", Some(&[0u8; 31])),
            Err(IdentityError::BadKeySize { expected: 32, got: 31 })
        ));
    }

    #[test]
    fn test_encode_to_off_curve_key() {
        let id = Identity::generate("a");
        let off_curve = (0u8..=255)
            .map(|b| {
                let mut key = [b; 32];
                key[31] &= 0x7F;
                key
            })
            .find(|key| {
                Ed25519PublicKey::from_bytes(*key)
                    .to_montgomery_bytes()
                    .is_err()
            })
            .expect("some pattern is not a curve point");

        let err = id.encode_packet(b"x", Some(&off_curve)).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidPublicKey));
        assert!(err.is_cryptographic());
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let (registry, _root, member) = network(Permission::POST, Permission::NONE);
        let stranger = Identity::generate("stranger");
        let env = stranger.encode_packet(b"hi", None).unwrap();
        assert!(matches!(
            member.try_decode_payload(&env, &registry),
            Err(IdentityError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_relabelled_unicast_rejected() {
        // A registered member re-signs a sealed payload it did not write.
        let (registry, root, member) = network(Permission::INVITE | Permission::POST, Permission::POST);
        let mut mallory = Identity::generate("mallory");
        let chain = root
            .generate_new_chain(mallory.public_key(), Permission::POST, Permission::NONE, "mallory")
            .unwrap();
        mallory.add_trust_chain(&chain, &registry).unwrap();

        let genuine = root
            .encode_packet(b"from root", Some(member.public_key().as_bytes()))
            .unwrap();
        let forged = Envelope::sign(
            &mallory.keypair,
            mallory.hash(),
            genuine.recipient,
            genuine.payload.clone(),
        );
        assert!(matches!(
            member.try_decode_payload(&forged, &registry),
            Err(IdentityError::SenderMismatch)
        ));
    }

    #[test]
    fn test_verify_envelope_for_relay() {
        let (registry, root, member) = network(Permission::POST, Permission::NONE);
        let env = member
            .encode_packet(b"for root", Some(root.public_key().as_bytes()))
            .unwrap();
        Identity::verify_envelope(&env, &registry).unwrap();

        let mut bad = env.clone();
        bad.payload = Bytes::from_static(b"altered");
        assert!(matches!(
            Identity::verify_envelope(&bad, &registry),
            Err(IdentityError::VerificationFailed)
        ));
    }

    #[test]
    fn test_key_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let id = Identity::generate("alice");
        id.save_key(&path).unwrap();
        let loaded = Identity::load_key(&path, "alice").unwrap();
        assert_eq!(loaded.hash(), id.hash());
        assert_eq!(loaded.public_key(), id.public_key());

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            Identity::load_key(&path, "alice"),
            Err(IdentityError::BadKeySize { expected: 32, got: 10 })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_round_trip(msg in proptest::collection::vec(any::<u8>(), 0..256), unicast: bool) {
            let (registry, root, member) = network(Permission::POST, Permission::NONE);
            let recipient = unicast.then(|| *member.public_key().as_bytes());
            let env = root.encode_packet(&msg, recipient.as_ref().map(|k| &k[..])).unwrap();

            let wire = env.to_bytes();
            let parsed = Envelope::from_bytes(&wire).unwrap();
            let decoded = member.try_decode_payload(&parsed, &registry).unwrap().unwrap();
            prop_assert_eq!(&decoded.payload[..], &msg[..]);
            prop_assert_eq!(decoded.unicast, unicast);
        }

        #[test]
        fn prop_tamper_rejected(
            msg in proptest::collection::vec(any::<u8>(), 1..64),
            unicast: bool,
            pick in any::<prop::sample::Index>(),
        ) {
            let (registry, root, member) = network(Permission::POST, Permission::NONE);
            let recipient = unicast.then(|| *member.public_key().as_bytes());
            let env = root.encode_packet(&msg, recipient.as_ref().map(|k| &k[..])).unwrap();

            // Flip a byte in the payload or signature.
            let mut wire = env.to_bytes().to_vec();
            let i = 64 + pick.index(wire.len() - 64);
            wire[i] ^= 0x01;
            let tampered = Envelope::from_bytes(&wire).unwrap();

            let err = member.try_decode_payload(&tampered, &registry).unwrap_err();
            prop_assert!(err.is_cryptographic());
        }
    }
}
