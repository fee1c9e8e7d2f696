//! # CampfireNet
//!
//! Serverless mesh messaging over short-range links.
//!
//! ## Overview
//!
//! A [`MeshCoordinator`] is one node of the mesh. It owns:
//!
//! - **Identity**: the node's key and its delegated trust chain
//! - **Registry**: every member chain learned so far
//! - **Log**: the deduplicated envelope log, mirrored by a Merkle tree
//! - **Links**: one neighbor connection per nearby device
//!
//! Messages spread epidemically. Each accepted envelope is relayed to every
//! other live link on its next flush, and any two nodes that meet reconcile
//! their logs with a Merkle diff.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use campfire_net::{Identity, MeshConfig, MeshCoordinator, RoomId};
//! use campfire_net::sync::memory::MemoryLink;
//!
//! async fn example() -> campfire_net::Result<()> {
//!     let mesh = MeshCoordinator::new(Identity::generate("fred"), MeshConfig::named("Fred"));
//!     mesh.generate_root_chain()?;
//!
//!     let mut room = mesh.subscribe(RoomId::broadcast());
//!
//!     // A platform binding supplies real links; here, one end of an in-memory pair.
//!     let (link, _other_end) = MemoryLink::pair();
//!     let handle = mesh.attach(Arc::new(link));
//!
//!     mesh.send_text(RoomId::broadcast(), "hello")?;
//!     if let Ok(event) = room.recv().await {
//!         println!("{}: {:?}", event.sender_name, event.content);
//!     }
//!     handle.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `campfire_net::core` - Ids, permissions, chain and envelope codecs
//! - `campfire_net::identity` - Identity, registry, sealed envelopes
//! - `campfire_net::merkle` - Merkle tree and diff
//! - `campfire_net::sync` - Neighbor connections

pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod room;

// Re-export component crates
pub use campfire_core as core;
pub use campfire_identity as identity;
pub use campfire_merkle as merkle;
pub use campfire_sync as sync;

// Re-export main types for convenience
pub use config::MeshConfig;
pub use coordinator::{EnvelopeOperations, IngestOutcome, MeshCoordinator, NeighborStatus};
pub use error::{MeshError, Result};
pub use message::{ChatMessage, MessageContent};
pub use room::{MessageEvent, Room, RoomTable};

// Re-export commonly used types
pub use campfire_core::{Ed25519PublicKey, IdentityHash, ItemKey, LinkId, Permission, RoomId};
pub use campfire_identity::{Identity, IdentityError, IdentityRegistry};
pub use campfire_sync::{ConnectionHandle, ConnectionState, Neighbor, SyncConfig};
