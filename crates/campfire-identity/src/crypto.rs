//! Sealed-box encryption for unicast payloads.
//!
//! The sender generates an ephemeral X25519 key, agrees with the recipient's
//! Montgomery-form identity key, and encrypts with ChaCha20-Poly1305:
//!
//! ```text
//! [ephemeralPublic:32][nonce:12][ciphertext+tag]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{IdentityError, Result};

const KDF_CONTEXT: &str = "campfire-seal-v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Bytes a sealed box adds on top of the plaintext.
pub const SEAL_OVERHEAD: usize = 32 + NONCE_LEN + TAG_LEN;

fn derive_key(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Encrypt `plaintext` to the holder of the X25519 key `recipient`.
pub fn seal(recipient: [u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let recipient = PublicKey::from(recipient);
    let ephemeral = EphemeralSecret::random_from_rng(&mut rng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);
    let key = derive_key(shared.as_bytes(), &ephemeral_public, &recipient);

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| IdentityError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| IdentityError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed box with the recipient's X25519 secret.
pub fn open(secret: [u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(IdentityError::DecryptionFailed(format!(
            "sealed payload of {} bytes is too short",
            sealed.len()
        )));
    }
    let secret = StaticSecret::from(secret);
    let recipient = PublicKey::from(&secret);

    let mut eph = [0u8; 32];
    eph.copy_from_slice(&sealed[..32]);
    let ephemeral_public = PublicKey::from(eph);
    let nonce = &sealed[32..32 + NONCE_LEN];

    let shared = secret.diffie_hellman(&ephemeral_public);
    let key = derive_key(shared.as_bytes(), &ephemeral_public, &recipient);

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| IdentityError::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), &sealed[32 + NONCE_LEN..])
        .map_err(|e| IdentityError::DecryptionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use campfire_core::Keypair;

    #[test]
    fn test_seal_open_with_identity_keys() {
        let kp = Keypair::generate();
        let recipient = kp.public_key().to_montgomery_bytes().unwrap();
        let sealed = seal(recipient, b"secret").unwrap();
        assert_eq!(sealed.len(), SEAL_OVERHEAD + 6);

        let opened = open(kp.agreement_secret_bytes(), &sealed).unwrap();
        assert_eq!(opened, b"secret");
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let sealed = seal(kp.public_key().to_montgomery_bytes().unwrap(), b"secret").unwrap();
        assert!(matches!(
            open(other.agreement_secret_bytes(), &sealed),
            Err(IdentityError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let kp = Keypair::generate();
        let mut sealed = seal(kp.public_key().to_montgomery_bytes().unwrap(), b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(open(kp.agreement_secret_bytes(), &sealed).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let kp = Keypair::generate();
        assert!(open(kp.agreement_secret_bytes(), &[0u8; SEAL_OVERHEAD - 1]).is_err());
    }

    #[test]
    fn test_sealing_is_randomized() {
        let kp = Keypair::generate();
        let pk = kp.public_key().to_montgomery_bytes().unwrap();
        assert_ne!(seal(pk, b"same").unwrap(), seal(pk, b"same").unwrap());
    }
}
