//! The mesh coordinator: one per node.
//!
//! Owns the identity, the registry, the message log and the live neighbor
//! connections. Every inbound envelope from every link funnels through
//! [`MeshCoordinator::ingest_envelope`], which dedups, authenticates,
//! appends, delivers to rooms and queues the envelope for relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tokio::sync::broadcast;

use campfire_core::{Ed25519PublicKey, Envelope, IdentityHash, ItemKey, LinkId, Permission, RoomId};
use campfire_identity::{Identity, IdentityError, IdentityRegistry};
use campfire_merkle::{ItemLog, ItemOperations, MerkleTree};
use campfire_sync::{
    limits, ConnectionHandle, ConnectionHandler, ConnectionState, Neighbor, NeighborConnection,
    PeerInfo, SyncError,
};

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::message::{ChatMessage, MessageContent};
use crate::room::{MessageEvent, Room, RoomTable};

/// Envelopes from unknown senders held back until their chain shows up.
const MAX_DEFERRED: usize = 256;

/// Envelopes are stored and keyed by their wire bytes.
pub struct EnvelopeOperations;

impl ItemOperations<Envelope> for EnvelopeOperations {
    fn serialize(&self, envelope: &Envelope) -> Vec<u8> {
        envelope.to_bytes().to_vec()
    }
}

/// What happened to an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to the log and queued for relay.
    Accepted {
        key: ItemKey,
        /// Whether it was addressed to us and handed to a room.
        delivered: bool,
    },
    /// Already in the log. Nothing changed.
    Duplicate(ItemKey),
    /// Sender not known yet. Retried when new chains are learned.
    Deferred(ItemKey),
}

impl IngestOutcome {
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Accepted { key, .. } | Self::Duplicate(key) | Self::Deferred(key) => *key,
        }
    }
}

/// A live link as seen by the coordinator.
#[derive(Debug, Clone)]
pub struct NeighborStatus {
    pub link: LinkId,
    pub state: ConnectionState,
    pub peer: Option<PeerInfo>,
}

struct LinkEntry {
    epoch: u64,
    handle: ConnectionHandle,
    pending: Vec<Bytes>,
}

/// One node of the mesh.
pub struct MeshCoordinator {
    identity: RwLock<Identity>,
    hash: IdentityHash,
    public_key: Ed25519PublicKey,
    registry: Arc<IdentityRegistry>,
    config: MeshConfig,
    log: Mutex<ItemLog<Envelope, EnvelopeOperations>>,
    links: Mutex<HashMap<LinkId, LinkEntry>>,
    deferred: Mutex<Vec<(Option<LinkId>, Bytes)>>,
    next_epoch: AtomicU64,
    rooms: RoomTable,
}

impl MeshCoordinator {
    /// Create a coordinator around `identity` with an empty registry and log.
    pub fn new(identity: Identity, config: MeshConfig) -> Arc<Self> {
        Arc::new(Self {
            hash: identity.hash(),
            public_key: *identity.public_key(),
            identity: RwLock::new(identity),
            registry: Arc::new(IdentityRegistry::new()),
            rooms: RoomTable::new(config.room_channel_capacity),
            config,
            log: Mutex::new(ItemLog::new(EnvelopeOperations)),
            links: Mutex::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
            next_epoch: AtomicU64::new(0),
        })
    }

    pub fn identity_hash(&self) -> IdentityHash {
        self.hash
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Held and grantable permissions from the installed chain.
    pub fn permissions(&self) -> (Permission, Permission) {
        let identity = self.identity();
        (identity.held(), identity.grantable())
    }

    pub fn has_chain(&self) -> bool {
        self.identity().has_chain()
    }

    pub fn chain_bytes(&self) -> Bytes {
        self.identity().chain_bytes()
    }

    fn identity(&self) -> RwLockReadGuard<'_, Identity> {
        self.identity.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn identity_mut(&self) -> RwLockWriteGuard<'_, Identity> {
        self.identity.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, ItemLog<Envelope, EnvelopeOperations>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn links(&self) -> MutexGuard<'_, HashMap<LinkId, LinkEntry>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Trust Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Make this node the root of a new network and announce it.
    pub fn generate_root_chain(&self) -> Result<Bytes> {
        let bytes = self.identity_mut().generate_root_chain(&self.registry)?;
        self.announce()?;
        Ok(bytes)
    }

    /// Install a chain delegated to this node and announce it.
    pub fn add_trust_chain(&self, bytes: &[u8]) -> Result<()> {
        self.identity_mut().add_trust_chain(bytes, &self.registry)?;
        self.announce()?;
        self.retry_deferred();
        Ok(())
    }

    /// Delegate to `child`, returning the chain to hand over.
    pub fn generate_new_chain(
        &self,
        child: &Ed25519PublicKey,
        held: Permission,
        grantable: Permission,
        name: &str,
    ) -> Result<Bytes> {
        Ok(self
            .identity()
            .generate_new_chain(child, held, grantable, name)?)
    }

    /// Learn a member's chain out of band.
    pub fn validate_and_add(&self, bytes: &[u8]) -> bool {
        let added = self.identity().validate_and_add(bytes, &self.registry);
        if added {
            self.retry_deferred();
        }
        added
    }

    /// Broadcast our own chain so members beyond our neighbors can verify us.
    pub fn announce(&self) -> Result<ItemKey> {
        let chain = self.chain_bytes();
        if chain.is_empty() {
            return Err(IdentityError::NoTrustChain.into());
        }
        self.publish(
            RoomId::broadcast(),
            None,
            MessageContent::TrustChain(chain),
            false,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Neighbors
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a connection over `neighbor` on its own task.
    ///
    /// Must be called inside a tokio runtime. A live connection on the same
    /// link is cancelled and replaced.
    pub fn attach(self: &Arc<Self>, neighbor: Arc<dyn Neighbor>) -> ConnectionHandle {
        let (conn, handle) = NeighborConnection::new(neighbor, self.config.sync.clone());
        let link = handle.link_id();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

        let previous = self.links().insert(
            link,
            LinkEntry {
                epoch,
                handle: handle.clone(),
                pending: Vec::new(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(link = %link, "replacing live connection");
            previous.handle.disconnect();
        }

        let scope = Arc::new(LinkScope {
            mesh: Arc::clone(self),
            epoch,
        });
        tokio::spawn(conn.run(scope));
        tracing::info!(link = %link, "neighbor attached");
        handle
    }

    /// Cancel the connection on `link`. Returns whether one was live.
    pub fn detach(&self, link: LinkId) -> bool {
        match self.links().get(&link) {
            Some(entry) => {
                entry.handle.disconnect();
                true
            }
            None => false,
        }
    }

    /// Cancel every connection.
    pub fn shutdown(&self) {
        for entry in self.links().values() {
            entry.handle.disconnect();
        }
    }

    /// Live links and their state.
    pub fn neighbors(&self) -> Vec<NeighborStatus> {
        self.links()
            .iter()
            .map(|(link, entry)| NeighborStatus {
                link: *link,
                state: entry.handle.state(),
                peer: entry.handle.peer(),
            })
            .collect()
    }

    fn accept_peer(
        &self,
        link: LinkId,
        claimed: &IdentityHash,
        trust_chain: &[u8],
    ) -> std::result::Result<PeerInfo, SyncError> {
        let admitted = self
            .identity()
            .admit_peer_chain(trust_chain, claimed, &self.registry);
        match admitted {
            Ok(leaf) => {
                tracing::info!(link = %link, peer = %claimed, name = %leaf.name, "peer admitted");
                self.retry_deferred();
                Ok(PeerInfo {
                    identity: *claimed,
                    name: leaf.name,
                })
            }
            Err(e) => {
                tracing::warn!(link = %link, peer = %claimed, error = %e, "peer rejected");
                Err(SyncError::PeerRejected(e.to_string()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rooms and Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Receive messages delivered to `room` from now on.
    pub fn subscribe(&self, room: RoomId) -> broadcast::Receiver<MessageEvent> {
        self.rooms.get_or_create(room).subscribe()
    }

    pub fn room(&self, room: RoomId) -> Arc<Room> {
        self.rooms.get_or_create(room)
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.rooms()
    }

    /// The direct-message room shared with `peer`.
    pub fn direct_room(&self, peer: &IdentityHash) -> RoomId {
        RoomId::direct(&self.hash, peer)
    }

    /// Broadcast text to a room.
    pub fn send_text(&self, room: RoomId, text: &str) -> Result<ItemKey> {
        self.send_content(room, None, MessageContent::Text(text.to_string()))
    }

    /// Send text sealed to one recipient, in our shared direct room.
    pub fn send_direct(&self, recipient: &Ed25519PublicKey, text: &str) -> Result<ItemKey> {
        let room = self.direct_room(&IdentityHash::of(recipient));
        self.send_content(room, Some(recipient), MessageContent::Text(text.to_string()))
    }

    /// Send any content, broadcast or sealed to `recipient`.
    ///
    /// The message is appended locally, delivered to local subscribers, and
    /// relayed on the next flush of every link.
    pub fn send_content(
        &self,
        room: RoomId,
        recipient: Option<&Ed25519PublicKey>,
        content: MessageContent,
    ) -> Result<ItemKey> {
        self.publish(room, recipient, content, true)
    }

    fn publish(
        &self,
        room: RoomId,
        recipient: Option<&Ed25519PublicKey>,
        content: MessageContent,
        deliver_locally: bool,
    ) -> Result<ItemKey> {
        let message = ChatMessage {
            room,
            sender_name: self.config.friendly_name.clone(),
            content,
        };
        let payload = message.encode()?;
        let envelope = {
            let identity = self.identity();
            if !identity.has_chain() {
                return Err(IdentityError::NoTrustChain.into());
            }
            identity.encode_packet(&payload, recipient.map(|k| k.as_bytes().as_slice()))?
        };
        let bytes = envelope.to_bytes();
        if bytes.len() > limits::MAX_ITEM_SIZE {
            return Err(MeshError::ItemTooLarge {
                size: bytes.len(),
                max: limits::MAX_ITEM_SIZE,
            });
        }

        let inserted = self.log().insert(envelope);
        let key = inserted.key();
        if !inserted.is_inserted() {
            return Ok(key);
        }

        if deliver_locally {
            let sender_name = self.delivered_name(message.sender_name, self.identity().name());
            self.rooms.publish(MessageEvent {
                room,
                sender: self.hash,
                sender_name,
                content: message.content,
                direct: recipient.is_some(),
            });
        }
        self.queue_relay(None, bytes);
        tracing::debug!(item = %key, room = %room, "message sent");
        Ok(key)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingest
    // ─────────────────────────────────────────────────────────────────────────

    /// Take in an envelope from `origin` (or from elsewhere, if `None`).
    ///
    /// Failures concern this envelope only: it is dropped and the caller
    /// carries on.
    pub fn ingest_envelope(&self, origin: Option<LinkId>, bytes: &[u8]) -> Result<IngestOutcome> {
        if bytes.len() > limits::MAX_ITEM_SIZE {
            return Err(MeshError::ItemTooLarge {
                size: bytes.len(),
                max: limits::MAX_ITEM_SIZE,
            });
        }
        let key = ItemKey::of(bytes);
        if self.log().contains(&key) {
            return Ok(IngestOutcome::Duplicate(key));
        }

        let envelope = Envelope::from_bytes(bytes)?;
        if self.learn_sender(&envelope) {
            self.retry_deferred();
        }

        let decoded = self.identity().try_decode_payload(&envelope, &self.registry);
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(IdentityError::UnknownSender(sender)) => {
                return Ok(self.defer(origin, bytes, key, sender))
            }
            Err(e) => return Err(e.into()),
        };
        let message = match &decoded {
            // Authentic but unreadable payloads are still carried on.
            Some(decoded) => match ChatMessage::decode(&decoded.payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::debug!(item = %key, error = %e, "payload is not a chat message");
                    None
                }
            },
            None => {
                // Not for us, but only authentic envelopes are carried on.
                match Identity::verify_envelope(&envelope, &self.registry) {
                    Ok(()) => None,
                    Err(IdentityError::UnknownSender(sender)) => {
                        return Ok(self.defer(origin, bytes, key, sender))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if !self.log().insert(envelope).is_inserted() {
            return Ok(IngestOutcome::Duplicate(key));
        }

        let delivered = match (decoded, message) {
            (Some(decoded), Some(message)) => {
                self.deliver(decoded.sender, decoded.sender_name, decoded.unicast, message);
                true
            }
            _ => false,
        };
        self.queue_relay(origin, Bytes::copy_from_slice(bytes));
        tracing::debug!(item = %key, delivered, "envelope accepted");
        Ok(IngestOutcome::Accepted { key, delivered })
    }

    /// Register the sender of a broadcast that carries its own chain.
    fn learn_sender(&self, envelope: &Envelope) -> bool {
        if !envelope.is_broadcast() || self.registry.contains(&envelope.sender) {
            return false;
        }
        let Ok(message) = ChatMessage::decode(&envelope.payload) else {
            return false;
        };
        let MessageContent::TrustChain(chain) = &message.content else {
            return false;
        };
        let admitted = self
            .identity()
            .admit_peer_chain(chain, &envelope.sender, &self.registry);
        match admitted {
            Ok(_) => {
                tracing::debug!(sender = %envelope.sender, "learned member from announcement");
                true
            }
            Err(e) => {
                tracing::debug!(sender = %envelope.sender, error = %e, "announcement rejected");
                false
            }
        }
    }

    fn defer(
        &self,
        origin: Option<LinkId>,
        bytes: &[u8],
        key: ItemKey,
        sender: IdentityHash,
    ) -> IngestOutcome {
        let mut deferred = self.deferred.lock().unwrap_or_else(PoisonError::into_inner);
        if !deferred.iter().any(|(_, b)| b.as_ref() == bytes) {
            if deferred.len() >= MAX_DEFERRED {
                deferred.remove(0);
            }
            deferred.push((origin, Bytes::copy_from_slice(bytes)));
        }
        tracing::debug!(item = %key, sender = %sender, "sender unknown, envelope deferred");
        IngestOutcome::Deferred(key)
    }

    fn retry_deferred(&self) {
        let pending = std::mem::take(
            &mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for (origin, bytes) in pending {
            if let Err(e) = self.ingest_envelope(origin, &bytes) {
                tracing::debug!(error = %e, "deferred envelope dropped");
            }
        }
    }

    fn deliver(&self, sender: IdentityHash, chain_name: String, direct: bool, message: ChatMessage) {
        let room = if direct {
            self.direct_room(&sender)
        } else {
            message.room
        };
        match &message.content {
            MessageContent::Text(_) => {}
            MessageContent::TrustChain(chain) => {
                if self.validate_and_add(chain) {
                    tracing::debug!(sender = %sender, "registered shared trust chain");
                }
            }
        }
        let sender_name = self.delivered_name(message.sender_name, &chain_name);
        self.rooms.publish(MessageEvent {
            room,
            sender,
            sender_name,
            content: message.content,
            direct,
        });
    }

    /// The friendly name if one was given, else the chain name.
    fn delivered_name(&self, friendly: String, chain_name: &str) -> String {
        if friendly.is_empty() {
            chain_name.to_string()
        } else {
            friendly
        }
    }

    fn queue_relay(&self, origin: Option<LinkId>, item: Bytes) {
        for (link, entry) in self.links().iter_mut() {
            if Some(*link) != origin {
                entry.pending.push(item.clone());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn root_digest(&self) -> campfire_core::Blake3Hash {
        self.log().root_digest()
    }

    pub fn item_count(&self) -> usize {
        self.log().len()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.log().contains(key)
    }

    /// Item keys in the order they were appended.
    pub fn item_keys(&self) -> Vec<ItemKey> {
        self.log().keys().to_vec()
    }

    pub fn tree_snapshot(&self) -> MerkleTree {
        self.log().snapshot()
    }
}

impl std::fmt::Debug for MeshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCoordinator")
            .field("identity", &self.hash)
            .field("items", &self.item_count())
            .field("links", &self.links().len())
            .finish()
    }
}

/// The handler one connection sees: the coordinator plus which attach it
/// came from.
struct LinkScope {
    mesh: Arc<MeshCoordinator>,
    epoch: u64,
}

impl ConnectionHandler for LinkScope {
    fn local_hello(&self) -> (IdentityHash, Bytes) {
        (self.mesh.hash, self.mesh.chain_bytes())
    }

    fn accept_peer(
        &self,
        link: LinkId,
        identity: &IdentityHash,
        trust_chain: &[u8],
    ) -> std::result::Result<PeerInfo, SyncError> {
        self.mesh.accept_peer(link, identity, trust_chain)
    }

    fn tree_snapshot(&self) -> MerkleTree {
        self.mesh.tree_snapshot()
    }

    fn items(&self, keys: &[ItemKey]) -> Vec<Bytes> {
        let log = self.mesh.log();
        keys.iter()
            .filter_map(|key| log.get(key))
            .map(Envelope::to_bytes)
            .collect()
    }

    fn ingest(&self, link: LinkId, item: Bytes) {
        if let Err(e) = self.mesh.ingest_envelope(Some(link), &item) {
            if e.is_cryptographic() {
                tracing::warn!(link = %link, error = %e, "dropped envelope");
            } else {
                tracing::debug!(link = %link, error = %e, "dropped envelope");
            }
        }
    }

    fn take_pending_relay(&self, link: LinkId) -> Vec<Bytes> {
        match self.mesh.links().get_mut(&link) {
            Some(entry) if entry.epoch == self.epoch => std::mem::take(&mut entry.pending),
            _ => Vec::new(),
        }
    }

    fn link_closed(&self, link: LinkId) {
        let mut links = self.mesh.links();
        if links.get(&link).is_some_and(|e| e.epoch == self.epoch) {
            links.remove(&link);
            tracing::info!(link = %link, "neighbor detached");
        }
    }
}
