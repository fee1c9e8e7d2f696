//! Keys, signatures and digests.
//!
//! A member's public identity is its 32-byte Ed25519 verifying key. The same
//! key signs chain links and envelopes, and its Montgomery form receives
//! sealed unicast payloads, so a member carries exactly one key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Bytes in an identity key (`parentId`, `thisId`).
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Bytes in a chain-link or envelope signature.
pub const SIGNATURE_SIZE: usize = 64;

/// A Merkle node digest. All zeros marks an empty subtree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    /// Digest of an empty subtree.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(&self.0[..8]))
    }
}

/// An identity key as it appears in chain links.
///
/// Not checked to be a curve point until it is used.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// A recipient key handed in from outside, which must be 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CoreError::BadKeySize {
                expected: PUBLIC_KEY_SIZE,
                got: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CoreError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)
    }

    /// Check a chain-link or envelope signature made by this key.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CoreError> {
        self.verifying_key()?
            .verify(message, &Signature::from_bytes(&signature.0))
            .map_err(|_| CoreError::InvalidSignature)
    }

    /// The X25519 key that sealed payloads for this identity are addressed to.
    pub fn to_montgomery_bytes(&self) -> Result<[u8; 32], CoreError> {
        Ok(self.verifying_key()?.to_montgomery().to_bytes())
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex::encode(&self.0[..8]))
    }
}

/// A signature over a chain link or an envelope.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Placeholder while a link is being built. Never verifies.
    pub const ZERO: Self = Self([0u8; 64]);

    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({}..)", hex::encode(&self.0[..8]))
    }
}

/// A member's secret key.
///
/// Only the 32-byte seed is persisted; everything else is derived from it.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }

    /// The seed written by key persistence.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// X25519 secret matching [`Ed25519PublicKey::to_montgomery_bytes`].
    pub fn agreement_secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_scalar_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_binds_message_and_signer() {
        let alice = Keypair::from_seed(&[1; 32]);
        let mallory = Keypair::from_seed(&[2; 32]);
        let link = b"campfire/chain-link/v1 alice";
        let sig = alice.sign(link);

        assert!(alice.public_key().verify(link, &sig).is_ok());
        assert!(matches!(
            alice.public_key().verify(b"campfire/chain-link/v1 mallory", &sig),
            Err(CoreError::InvalidSignature)
        ));
        assert!(mallory.public_key().verify(link, &sig).is_err());
        assert!(alice.public_key().verify(link, &Ed25519Signature::ZERO).is_err());
    }

    #[test]
    fn test_seed_reproduces_identity() {
        let original = Keypair::generate();
        let restored = Keypair::from_seed(&original.seed());
        assert_eq!(restored.public_key(), original.public_key());
    }

    #[test]
    fn test_recipient_key_size_checked() {
        let key = Keypair::generate().public_key();
        assert_eq!(Ed25519PublicKey::from_slice(key.as_bytes()).unwrap(), key);
        assert!(matches!(
            Ed25519PublicKey::from_slice(&[0u8; 33]),
            Err(CoreError::BadKeySize { expected: 32, got: 33 })
        ));
    }

    #[test]
    fn test_sealing_key_follows_identity() {
        let alice = Keypair::from_seed(&[3; 32]).public_key();
        let bob = Keypair::from_seed(&[4; 32]).public_key();
        assert_eq!(
            alice.to_montgomery_bytes().unwrap(),
            alice.to_montgomery_bytes().unwrap()
        );
        assert_ne!(
            alice.to_montgomery_bytes().unwrap(),
            bob.to_montgomery_bytes().unwrap()
        );
    }
}
