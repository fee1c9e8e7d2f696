//! The per-link neighbor connection.
//!
//! One [`NeighborConnection`] runs per physical link, on its own task. It
//! owns the link's outbound queue and the partial diff state, and talks to
//! the rest of the node only through a [`ConnectionHandler`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{timeout, MissedTickBehavior};

use campfire_core::{IdentityHash, ItemKey, LinkId};
use campfire_merkle::{DiffSession, MerkleTree, NodePath};

use crate::error::{Result, SyncError};
use crate::messages::{
    item_batches, limits, MeshErrorCode, MeshMessage, NodeEntry, PROTOCOL_VERSION,
};
use crate::outbound::OutboundQueue;
use crate::state::{ConnectionState, StateCell};
use crate::transport::Neighbor;

/// Configuration for neighbor connections.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound on the transport handshake plus the Hello exchange.
    pub handshake_timeout: Duration,
    /// Bound on the whole sync phase.
    pub sync_timeout: Duration,
    /// How often pending relay items are pushed to the peer.
    pub relay_interval: Duration,
    /// Maximum items in one Items frame. Frames are also capped by size.
    pub max_batch_size: usize,
    /// Maximum paths in one GetNodes frame.
    pub max_paths_per_request: usize,
    /// Outbound frames that may queue before senders wait.
    pub outbound_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(30),
            relay_interval: Duration::from_secs(1),
            max_batch_size: 50,
            max_paths_per_request: 64,
            outbound_capacity: 32,
        }
    }
}

/// A peer that passed the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub identity: IdentityHash,
    pub name: String,
}

/// Outcome of one connection's lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub link: LinkId,
    /// Set once the handshake succeeded.
    pub peer: Option<PeerInfo>,
    pub items_received: usize,
    pub items_sent: usize,
    /// Whether the sync phase finished and the link reached `Relaying`.
    pub completed_sync: bool,
    /// Why the connection ended, if it was not a clean close.
    pub error: Option<String>,
}

/// What a connection needs from the node it belongs to.
///
/// Calls are synchronous and must not block for long: they run on the
/// connection's task between frames.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Our identity hash and serialized trust chain, sent in Hello.
    fn local_hello(&self) -> (IdentityHash, Bytes);

    /// Validate a peer's Hello. An error rejects the peer.
    fn accept_peer(
        &self,
        link: LinkId,
        identity: &IdentityHash,
        trust_chain: &[u8],
    ) -> Result<PeerInfo>;

    /// A consistent snapshot of the local tree.
    fn tree_snapshot(&self) -> MerkleTree;

    /// Serialized items for the keys we hold. Unknown keys are skipped.
    fn items(&self, keys: &[ItemKey]) -> Vec<Bytes>;

    /// An item arrived from the peer on `link`.
    fn ingest(&self, link: LinkId, item: Bytes);

    /// Drain the items queued for relay to `link`.
    fn take_pending_relay(&self, link: LinkId) -> Vec<Bytes>;

    /// The connection on `link` has ended.
    fn link_closed(&self, _link: LinkId) {}
}

/// Observes and controls a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    link: LinkId,
    state: watch::Receiver<ConnectionState>,
    peer: watch::Receiver<Option<PeerInfo>>,
    report: watch::Receiver<Option<ConnectionReport>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn link_id(&self) -> LinkId {
        self.link
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The authenticated peer, once the handshake is through.
    pub fn peer(&self) -> Option<PeerInfo> {
        self.peer.borrow().clone()
    }

    /// Cancel whatever step the connection is in and close it.
    pub fn disconnect(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait until the connection is in `target`.
    ///
    /// Returns `false` if the connection ends first. States the connection
    /// passes through quickly may be missed.
    pub async fn wait_for_state(&self, target: ConnectionState) -> bool {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(|s| *s == target).await.is_ok();
        reached
    }

    /// Wait for the connection to finish and return its report.
    ///
    /// `None` if the connection task was dropped without finishing.
    pub async fn closed(&self) -> Option<ConnectionReport> {
        let mut rx = self.report.clone();
        let result = rx.wait_for(Option::is_some).await;
        match result {
            Ok(report) => report.clone(),
            Err(_) => None,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("link", &self.link)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Default)]
struct Tally {
    items_received: usize,
    items_sent: usize,
}

/// One neighbor link driven through handshake, sync and relay.
pub struct NeighborConnection {
    neighbor: Arc<dyn Neighbor>,
    config: SyncConfig,
    state: StateCell,
    peer: watch::Sender<Option<PeerInfo>>,
    report: watch::Sender<Option<ConnectionReport>>,
    cancel: watch::Receiver<bool>,
}

impl NeighborConnection {
    /// Create a connection over `neighbor` and its control handle.
    pub fn new(neighbor: Arc<dyn Neighbor>, config: SyncConfig) -> (Self, ConnectionHandle) {
        let (state, state_rx) = StateCell::new();
        let (peer, peer_rx) = watch::channel(None);
        let (report, report_rx) = watch::channel(None);
        let (cancel_tx, cancel) = watch::channel(false);

        let handle = ConnectionHandle {
            link: neighbor.link_id(),
            state: state_rx,
            peer: peer_rx,
            report: report_rx,
            cancel: Arc::new(cancel_tx),
        };
        let conn = Self {
            neighbor,
            config,
            state,
            peer,
            report,
            cancel,
        };
        (conn, handle)
    }

    pub fn link_id(&self) -> LinkId {
        self.neighbor.link_id()
    }

    /// Drive the connection until the link drops, the peer fails, or the
    /// handle cancels it. Never fails: the outcome is in the report.
    pub async fn run<H: ConnectionHandler>(mut self, handler: Arc<H>) -> ConnectionReport {
        let link = self.link_id();
        let mut tally = Tally::default();
        let mut cancel = self.cancel.clone();

        let outcome = tokio::select! {
            result = self.drive(handler.as_ref(), &mut tally) => result,
            _ = cancelled(&mut cancel) => Err(SyncError::Cancelled),
        };

        let last = self.state.current();
        self.neighbor.disconnect().await;
        handler.link_closed(link);

        match &outcome {
            Ok(()) | Err(SyncError::Cancelled) => {
                tracing::info!(link = %link, state = %last, "neighbor connection closed");
            }
            Err(e) => {
                tracing::warn!(link = %link, state = %last, error = %e, "neighbor connection failed");
            }
        }

        let report = ConnectionReport {
            link,
            peer: self.peer.borrow().clone(),
            items_received: tally.items_received,
            items_sent: tally.items_sent,
            completed_sync: matches!(last, ConnectionState::Relaying),
            error: match outcome {
                Ok(()) | Err(SyncError::Cancelled) => None,
                Err(e) => Some(e.to_string()),
            },
        };
        self.report.send_replace(Some(report.clone()));
        self.state.finish();
        report
    }

    async fn drive<H: ConnectionHandler>(&mut self, handler: &H, tally: &mut Tally) -> Result<()> {
        let link = self.link_id();
        let outbound = OutboundQueue::spawn(Arc::clone(&self.neighbor), self.config.outbound_capacity);

        self.transition(ConnectionState::Handshaking)?;
        let peer = timeout(self.config.handshake_timeout, self.handshake(handler, &outbound))
            .await
            .map_err(|_| SyncError::Timeout("handshake".into()))??;
        tracing::debug!(link = %link, peer = %peer.identity, name = %peer.name, "peer accepted");
        self.peer.send_replace(Some(peer));

        self.transition(ConnectionState::Syncing)?;
        timeout(self.config.sync_timeout, self.sync(handler, &outbound, tally))
            .await
            .map_err(|_| SyncError::Timeout("sync".into()))??;

        self.transition(ConnectionState::Relaying)?;
        self.relay(handler, &outbound, tally).await
    }

    fn transition(&mut self, to: ConnectionState) -> Result<()> {
        let from = self.state.current();
        self.state.transition(to)?;
        tracing::debug!(link = %self.link_id(), %from, %to, "connection state");
        Ok(())
    }

    // ─── Handshake ───────────────────────────────────────────────────────────

    async fn handshake<H: ConnectionHandler>(
        &self,
        handler: &H,
        outbound: &OutboundQueue,
    ) -> Result<PeerInfo> {
        if !self.neighbor.try_handshake(self.config.handshake_timeout).await {
            return Err(SyncError::TransportError(
                "transport handshake failed".into(),
            ));
        }

        let (identity, trust_chain) = handler.local_hello();
        outbound
            .send_message(&MeshMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                identity,
                trust_chain,
            })
            .await?;

        match self.next_message(outbound).await? {
            MeshMessage::Hello {
                protocol_version,
                identity,
                trust_chain,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    let err = SyncError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        peer: protocol_version,
                    };
                    send_error(outbound, MeshErrorCode::VersionMismatch, &err).await;
                    return Err(err);
                }
                match handler.accept_peer(self.link_id(), &identity, &trust_chain) {
                    Ok(peer) => Ok(peer),
                    Err(err) => {
                        send_error(outbound, MeshErrorCode::Untrusted, &err).await;
                        Err(err)
                    }
                }
            }
            MeshMessage::Error { code, message } => Err(SyncError::PeerError { code, message }),
            other => {
                let err = SyncError::InvalidMessage(format!("{} before Hello", other.kind()));
                send_error(outbound, MeshErrorCode::InvalidMessage, &err).await;
                Err(err)
            }
        }
    }

    // ─── Sync ────────────────────────────────────────────────────────────────

    async fn sync<H: ConnectionHandler>(
        &self,
        handler: &H,
        outbound: &OutboundQueue,
        tally: &mut Tally,
    ) -> Result<()> {
        let link = self.link_id();
        let snapshot = handler.tree_snapshot();
        let mut session = DiffSession::new(snapshot.clone());
        let mut awaiting: BTreeSet<ItemKey> = BTreeSet::new();
        let mut diff_done = false;
        let mut done_sent = false;
        let mut done_received = false;

        self.request_nodes(&mut session, outbound).await?;

        loop {
            if !done_sent && diff_done && awaiting.is_empty() {
                outbound.send_message(&MeshMessage::SyncDone).await?;
                done_sent = true;
            }
            if done_sent && done_received {
                tracing::debug!(
                    link = %link,
                    paths = session.requested(),
                    missing_locally = session.diff().missing_locally.len(),
                    missing_remotely = session.diff().missing_remotely.len(),
                    "sync complete"
                );
                return Ok(());
            }

            match self.next_message(outbound).await? {
                MeshMessage::GetNodes { paths } => {
                    answer_nodes(&snapshot, paths, outbound).await?;
                }
                MeshMessage::Nodes { summaries } => {
                    for entry in summaries {
                        if let Err(e) = session.apply(entry.path, entry.summary) {
                            let err = SyncError::from(e);
                            send_error(outbound, MeshErrorCode::InvalidMessage, &err).await;
                            return Err(err);
                        }
                    }
                    if self.request_nodes(&mut session, outbound).await? == 0
                        && session.is_complete()
                        && !diff_done
                    {
                        let missing: Vec<ItemKey> =
                            session.diff().missing_locally.iter().copied().collect();
                        for chunk in missing.chunks(limits::MAX_KEYS_PER_REQUEST) {
                            outbound
                                .send_message(&MeshMessage::NeedItems {
                                    keys: chunk.to_vec(),
                                })
                                .await?;
                        }
                        awaiting.extend(missing);
                        diff_done = true;
                    }
                }
                MeshMessage::NeedItems { keys } => {
                    self.send_items(handler.items(&keys), outbound, tally).await?;
                }
                MeshMessage::Items { items } => {
                    for item in items {
                        awaiting.remove(&ItemKey::of(&item));
                        tally.items_received += 1;
                        handler.ingest(link, item);
                    }
                }
                MeshMessage::SyncDone => done_received = true,
                MeshMessage::Hello { .. } => {
                    let err = SyncError::InvalidMessage("second Hello".into());
                    send_error(outbound, MeshErrorCode::InvalidMessage, &err).await;
                    return Err(err);
                }
                MeshMessage::Error { code, message } => {
                    return Err(SyncError::PeerError { code, message });
                }
            }
        }
    }

    /// Send the next GetNodes batch, returning how many paths it asked for.
    async fn request_nodes(
        &self,
        session: &mut DiffSession,
        outbound: &OutboundQueue,
    ) -> Result<usize> {
        let max = self
            .config
            .max_paths_per_request
            .clamp(1, limits::MAX_PATHS_PER_REQUEST);
        let paths = session.next_request(max);
        if paths.is_empty() {
            return Ok(0);
        }
        let n = paths.len();
        outbound.send_message(&MeshMessage::GetNodes { paths }).await?;
        Ok(n)
    }

    // ─── Relay ───────────────────────────────────────────────────────────────

    async fn relay<H: ConnectionHandler>(
        &self,
        handler: &H,
        outbound: &OutboundQueue,
        tally: &mut Tally,
    ) -> Result<()> {
        let link = self.link_id();
        let mut tick = tokio::time::interval(self.config.relay_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.neighbor.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    match decode_or_reject(&frame, outbound).await? {
                        MeshMessage::GetNodes { paths } => {
                            answer_nodes(&handler.tree_snapshot(), paths, outbound).await?;
                        }
                        MeshMessage::NeedItems { keys } => {
                            self.send_items(handler.items(&keys), outbound, tally).await?;
                        }
                        MeshMessage::Items { items } => {
                            for item in items {
                                tally.items_received += 1;
                                handler.ingest(link, item);
                            }
                        }
                        // Late answers from the sync phase.
                        MeshMessage::Nodes { .. } | MeshMessage::SyncDone => {}
                        MeshMessage::Hello { .. } => {
                            let err = SyncError::InvalidMessage("second Hello".into());
                            send_error(outbound, MeshErrorCode::InvalidMessage, &err).await;
                            return Err(err);
                        }
                        MeshMessage::Error { code, message } => {
                            return Err(SyncError::PeerError { code, message });
                        }
                    }
                }
                _ = tick.tick() => {
                    let pending = handler.take_pending_relay(link);
                    if !pending.is_empty() {
                        tracing::debug!(link = %link, count = pending.len(), "relay flush");
                        self.send_items(pending, outbound, tally).await?;
                    }
                }
            }
        }
    }

    // ─── Frames ──────────────────────────────────────────────────────────────

    async fn next_message(&self, outbound: &OutboundQueue) -> Result<MeshMessage> {
        match self.neighbor.recv().await {
            Some(frame) => decode_or_reject(&frame, outbound).await,
            None => Err(SyncError::TransportError("link dropped".into())),
        }
    }

    async fn send_items(
        &self,
        items: Vec<Bytes>,
        outbound: &OutboundQueue,
        tally: &mut Tally,
    ) -> Result<()> {
        let items: Vec<Bytes> = items
            .into_iter()
            .filter(|item| {
                let fits = item.len() <= limits::MAX_ITEM_SIZE;
                if !fits {
                    tracing::warn!(link = %self.link_id(), size = item.len(), "item too large to send");
                }
                fits
            })
            .collect();
        for batch in item_batches(items, self.config.max_batch_size) {
            let count = batch.len();
            outbound
                .send_message(&MeshMessage::Items { items: batch })
                .await?;
            tally.items_sent += count;
        }
        Ok(())
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // All handles dropped means nobody can cancel any more.
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn answer_nodes(
    tree: &MerkleTree,
    paths: Vec<NodePath>,
    outbound: &OutboundQueue,
) -> Result<()> {
    let summaries = paths
        .into_iter()
        .map(|path| NodeEntry {
            summary: tree.summarize(&path),
            path,
        })
        .collect();
    outbound
        .send_message(&MeshMessage::Nodes { summaries })
        .await
}

async fn decode_or_reject(frame: &[u8], outbound: &OutboundQueue) -> Result<MeshMessage> {
    match MeshMessage::decode(frame) {
        Ok(msg) => Ok(msg),
        Err(err) => {
            send_error(outbound, MeshErrorCode::for_error(&err), &err).await;
            Err(err)
        }
    }
}

/// Best-effort Error frame before closing.
async fn send_error(outbound: &OutboundQueue, code: MeshErrorCode, err: &SyncError) {
    let mut message = err.to_string();
    if message.len() > limits::MAX_ERROR_MESSAGE {
        let mut end = limits::MAX_ERROR_MESSAGE;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    let _ = outbound
        .send_message(&MeshMessage::Error { code, message })
        .await;
}
