//! The neighbor transport contract.
//!
//! A platform binding (Bluetooth, Wi-Fi Direct, ...) implements [`Neighbor`]
//! for each physical link. The core only needs raw frames in both directions.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use campfire_core::LinkId;

use crate::error::Result;

/// One raw bidirectional link to a nearby device.
///
/// Implementations must be thread-safe: the connection reads and writes
/// from different tasks.
#[async_trait]
pub trait Neighbor: Send + Sync {
    /// Stable identifier of this link.
    fn link_id(&self) -> LinkId;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;

    /// The next inbound frame. `None` once the link has dropped.
    ///
    /// Must be cancel-safe: a dropped `recv` future loses no frame.
    async fn recv(&self) -> Option<Bytes>;

    /// Run the transport-level handshake within `timeout`.
    async fn try_handshake(&self, timeout: Duration) -> bool;

    /// Queue an outbound frame. Fails if the link is down.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Release the link.
    async fn disconnect(&self);
}

/// An in-memory link for tests and simulations.
///
/// Uses channels to carry frames between the two ends.
pub mod memory {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch, Mutex};

    use crate::error::SyncError;

    /// One end of an in-memory link.
    pub struct MemoryLink {
        link_id: LinkId,
        tx: mpsc::UnboundedSender<Bytes>,
        rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
        /// Shared by both ends; `true` once either side drops the link.
        closed: Arc<watch::Sender<bool>>,
    }

    impl MemoryLink {
        /// Create two connected ends sharing one link id.
        pub fn pair() -> (Self, Self) {
            let link_id = LinkId::random();
            let (a_tx, b_rx) = mpsc::unbounded_channel();
            let (b_tx, a_rx) = mpsc::unbounded_channel();
            let (closed, _) = watch::channel(false);
            let closed = Arc::new(closed);

            let a = Self {
                link_id,
                tx: a_tx,
                rx: Mutex::new(a_rx),
                closed: Arc::clone(&closed),
            };
            let b = Self {
                link_id,
                tx: b_tx,
                rx: Mutex::new(b_rx),
                closed,
            };
            (a, b)
        }

        /// Simulate the radio link going away for both ends.
        pub fn drop_link(&self) {
            self.closed.send_replace(true);
        }
    }

    #[async_trait]
    impl Neighbor for MemoryLink {
        fn link_id(&self) -> LinkId {
            self.link_id
        }

        fn is_connected(&self) -> bool {
            !*self.closed.borrow()
        }

        async fn recv(&self) -> Option<Bytes> {
            let mut closed = self.closed.subscribe();
            let mut rx = self.rx.lock().await;
            // Frames that arrived before the drop are still delivered.
            if let Ok(frame) = rx.try_recv() {
                return Some(frame);
            }
            if *closed.borrow_and_update() {
                return None;
            }
            tokio::select! {
                biased;
                frame = rx.recv() => frame,
                _ = closed.wait_for(|c| *c) => None,
            }
        }

        async fn try_handshake(&self, _timeout: Duration) -> bool {
            self.is_connected()
        }

        async fn send(&self, frame: Bytes) -> Result<()> {
            if !self.is_connected() {
                return Err(SyncError::TransportError("link is down".into()));
            }
            self.tx
                .send(frame)
                .map_err(|_| SyncError::TransportError("peer end dropped".into()))
        }

        async fn disconnect(&self) {
            self.drop_link();
        }
    }
}
