//! Per-link outbound queue.
//!
//! A single writer task owns the send side of a link, so frames leave in the
//! order they were queued. Every send reports the transport's result back to
//! its caller.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::messages::MeshMessage;
use crate::transport::Neighbor;

struct Outbound {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// Ordered, acknowledged sends to one neighbor.
pub struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
    writer: JoinHandle<()>,
}

impl OutboundQueue {
    /// Spawn the writer task for `neighbor`.
    pub fn spawn(neighbor: Arc<dyn Neighbor>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Outbound>(capacity.max(1));
        let writer = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let result = neighbor.send(item.frame).await;
                if let Err(e) = &result {
                    tracing::debug!(link = %neighbor.link_id(), error = %e, "outbound send failed");
                }
                // The caller may have given up waiting.
                let _ = item.done.send(result);
            }
        });
        Self { tx, writer }
    }

    /// Queue a frame and wait for the transport to accept it.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        let (done, result) = oneshot::channel();
        self.tx
            .send(Outbound { frame, done })
            .await
            .map_err(|_| SyncError::TransportError("outbound queue closed".into()))?;
        result
            .await
            .map_err(|_| SyncError::TransportError("outbound writer stopped".into()))?
    }

    /// Encode and send a message.
    pub async fn send_message(&self, msg: &MeshMessage) -> Result<()> {
        self.send(msg.encode()?).await
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryLink;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (a, b) = MemoryLink::pair();
        let queue = OutboundQueue::spawn(Arc::new(a), 4);

        for i in 0u8..20 {
            queue.send(Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0u8..20 {
            assert_eq!(b.recv().await.unwrap(), Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_send_reports_failure() {
        let (a, b) = MemoryLink::pair();
        let a = Arc::new(a);
        let queue = OutboundQueue::spawn(a.clone(), 4);

        b.drop_link();
        let err = queue.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportError(_)));
    }
}
