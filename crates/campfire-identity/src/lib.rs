//! # CampfireNet Identity
//!
//! Local identities, delegated trust chains, and the envelope protocol.
//!
//! ## Trust model
//!
//! Trust is delegated from a self-signed root. An identity holding `Invite`
//! can issue a link to a new member, narrowing permissions as it goes. Peers
//! that share a root can authenticate each other using only chains they have
//! seen, recorded in the [`IdentityRegistry`].
//!
//! ## Envelopes
//!
//! Broadcast envelopes carry plaintext. Unicast envelopes seal
//! `senderHash ‖ message` to the recipient's key; the embedded sender hash is
//! re-checked after decryption so a relay cannot relabel the outer sender.

pub mod crypto;
pub mod error;
pub mod identity;
pub mod registry;

pub use error::{IdentityError, Result};
pub use identity::{DecodedPayload, Identity};
pub use registry::{IdentityRegistry, Provenance, RegisteredIdentity};
