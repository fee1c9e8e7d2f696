//! Envelope wire codec.
//!
//! ```text
//! [senderHash:32][recipientHash:32][payload:var][signature:64]
//! ```
//!
//! The signature covers `domain ‖ sender ‖ recipient ‖ payload`. A recipient
//! of all zeros addresses the broadcast channel. An envelope's item key is
//! the Blake3 hash of its full wire bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, SIGNATURE_SIZE};
use crate::error::CoreError;
use crate::types::{IdentityHash, ItemKey};

/// Domain tag prefixed to every signed envelope.
pub const ENVELOPE_DOMAIN: &[u8] = b"campfire/envelope/v1";

const HEADER_LEN: usize = 64;

/// Smallest well-formed envelope: header, empty payload, signature.
pub const MIN_ENVELOPE_SIZE: usize = HEADER_LEN + SIGNATURE_SIZE;

/// A signed message unit exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub sender: IdentityHash,
    pub recipient: IdentityHash,
    /// Plaintext for broadcast, sealed ciphertext for unicast.
    pub payload: Bytes,
    pub signature: Ed25519Signature,
}

impl Envelope {
    /// Build and sign an envelope.
    pub fn sign(
        keypair: &Keypair,
        sender: IdentityHash,
        recipient: IdentityHash,
        payload: Bytes,
    ) -> Self {
        let signature = keypair.sign(&signed_message(&sender, &recipient, &payload));
        Self {
            sender,
            recipient,
            payload,
            signature,
        }
    }

    /// Whether this envelope addresses the broadcast channel.
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_broadcast()
    }

    /// The bytes covered by the signature.
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message(&self.sender, &self.recipient, &self.payload)
    }

    /// Verify the signature under the sender's public key.
    pub fn verify(&self, sender_key: &Ed25519PublicKey) -> Result<(), CoreError> {
        sender_key.verify(&self.signed_message(), &self.signature)
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_ENVELOPE_SIZE + self.payload.len());
        buf.put_slice(self.sender.as_bytes());
        buf.put_slice(self.recipient.as_bytes());
        buf.put_slice(&self.payload);
        buf.put_slice(self.signature.as_bytes());
        buf.freeze()
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < MIN_ENVELOPE_SIZE {
            return Err(CoreError::MalformedEnvelope(format!(
                "{} bytes is shorter than the minimum {}",
                bytes.len(),
                MIN_ENVELOPE_SIZE
            )));
        }
        let sig_start = bytes.len() - SIGNATURE_SIZE;
        let mut sender = [0u8; 32];
        sender.copy_from_slice(&bytes[..32]);
        let mut recipient = [0u8; 32];
        recipient.copy_from_slice(&bytes[32..64]);
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&bytes[sig_start..]);

        Ok(Self {
            sender: IdentityHash::from_bytes(sender),
            recipient: IdentityHash::from_bytes(recipient),
            payload: Bytes::copy_from_slice(&bytes[HEADER_LEN..sig_start]),
            signature: Ed25519Signature::from_bytes(sig),
        })
    }

    /// Content-derived key used for dedup and sync.
    pub fn item_key(&self) -> ItemKey {
        ItemKey::of(&self.to_bytes())
    }
}

fn signed_message(sender: &IdentityHash, recipient: &IdentityHash, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(ENVELOPE_DOMAIN.len() + HEADER_LEN + payload.len());
    msg.extend_from_slice(ENVELOPE_DOMAIN);
    msg.extend_from_slice(sender.as_bytes());
    msg.extend_from_slice(recipient.as_bytes());
    msg.extend_from_slice(payload);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(payload: &[u8]) -> (Keypair, Envelope) {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let sender = IdentityHash::of(&kp.public_key());
        let env = Envelope::sign(
            &kp,
            sender,
            IdentityHash::BROADCAST,
            Bytes::copy_from_slice(payload),
        );
        (kp, env)
    }

    #[test]
    fn test_sign_verify() {
        let (kp, env) = sample(b"hello");
        assert!(env.is_broadcast());
        env.verify(&kp.public_key()).unwrap();
        assert!(env.verify(&Keypair::generate().public_key()).is_err());
    }

    #[test]
    fn test_wire_roundtrip_preserves_key() {
        let (_, env) = sample(b"hello");
        let bytes = env.to_bytes();
        assert_eq!(bytes.len(), MIN_ENVELOPE_SIZE + 5);
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.item_key(), env.item_key());
    }

    #[test]
    fn test_empty_payload() {
        let (kp, env) = sample(b"");
        let parsed = Envelope::from_bytes(&env.to_bytes()).unwrap();
        parsed.verify(&kp.public_key()).unwrap();
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            Envelope::from_bytes(&[0u8; MIN_ENVELOPE_SIZE - 1]),
            Err(CoreError::MalformedEnvelope(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_any_byte_flip_breaks_signature(
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            pick in any::<prop::sample::Index>(),
        ) {
            let (kp, env) = sample(&payload);
            let mut bytes = env.to_bytes().to_vec();
            let i = pick.index(bytes.len());
            bytes[i] ^= 0x01;
            let tampered = Envelope::from_bytes(&bytes).unwrap();
            prop_assert!(tampered.verify(&kp.public_key()).is_err());
        }
    }
}
