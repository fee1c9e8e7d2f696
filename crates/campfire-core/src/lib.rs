//! # CampfireNet Core
//!
//! Pure primitives for CampfireNet: identifiers, permissions, the trust
//! chain codec, and the envelope wire codec.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`IdentityHash`] - Blake3 of a participant's Ed25519 public key
//! - [`TrustChainNode`] - One signed delegation link
//! - [`Permission`] - Capability bitset that narrows down a chain
//! - [`Envelope`] - Signed message unit exchanged between peers
//! - [`ItemKey`] - Content-derived key of a log item

pub mod chain;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod permission;
pub mod types;

pub use chain::{
    segment_chain, serialize_chain, validate_trust_chain, TrustChainNode, NAME_CAPACITY,
    NODE_SIZE,
};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use envelope::{Envelope, MIN_ENVELOPE_SIZE};
pub use error::{ChainError, CoreError};
pub use permission::Permission;
pub use types::{IdentityHash, ItemKey, LinkId, RoomId};
