//! # CampfireNet Sync
//!
//! Neighbor connections over intermittent links.
//!
//! ## Overview
//!
//! Each physical link runs one [`NeighborConnection`] on its own task. The
//! connection authenticates the peer, reconciles both message logs with a
//! Merkle diff, then stays open relaying new items until the link drops.
//!
//! ## Key Properties
//!
//! - **Isolated**: A failing link ends only its own connection
//! - **Idempotent**: An interrupted sync is simply redone on reconnect
//! - **Bandwidth-efficient**: Only subtrees whose digests differ are walked
//! - **Ordered**: Frames on one link are sent and handled in order
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use campfire_sync::{memory::MemoryLink, ConnectionHandler, NeighborConnection, SyncConfig};
//!
//! async fn example<H: ConnectionHandler>(handler: Arc<H>) {
//!     let (link, _other_end) = MemoryLink::pair();
//!     let (conn, handle) = NeighborConnection::new(Arc::new(link), SyncConfig::default());
//!     tokio::spawn(conn.run(handler));
//!
//!     // ... later
//!     handle.disconnect();
//!     let report = handle.closed().await;
//!     println!("{report:?}");
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Node A                              Node B
//!   |-------- Hello ------------------>|   Handshaking
//!   |<------- Hello -------------------|
//!   |-------- GetNodes [/] ----------->|   Syncing
//!   |<------- GetNodes [/] ------------|
//!   |<------- Nodes -------------------|
//!   |-------- Nodes ------------------>|
//!   |        ... one level deeper per round, mismatches only ...
//!   |-------- NeedItems -------------->|
//!   |<------- Items -------------------|
//!   |-------- SyncDone --------------->|
//!   |<------- SyncDone ----------------|
//!   |<------- Items (relay) ---------->|   Relaying
//! ```

pub mod connection;
pub mod error;
pub mod messages;
pub mod outbound;
pub mod state;
pub mod transport;

pub use connection::{
    ConnectionHandle, ConnectionHandler, ConnectionReport, NeighborConnection, PeerInfo,
    SyncConfig,
};
pub use error::{Result, SyncError};
pub use messages::{limits, MeshErrorCode, MeshMessage, NodeEntry, PROTOCOL_VERSION};
pub use outbound::OutboundQueue;
pub use state::ConnectionState;
pub use transport::{memory, Neighbor};
