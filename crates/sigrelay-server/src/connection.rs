//! Per-peer outbound channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::mpsc;
use tracing::warn;

use crate::metrics::WS_SEND_DROPS_TOTAL;
use crate::protocol::ServerMessage;

/// Sending half of a connected peer's socket.
///
/// Frames are queued on a bounded channel drained by the socket's writer
/// task, so a slow peer only ever delays itself.
pub struct PeerConnection {
    /// Peer id assigned at upgrade.
    pub id: String,
    /// Queue to the socket writer.
    tx: mpsc::Sender<Arc<String>>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Frames discarded because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl PeerConnection {
    /// Wrap the writer queue for peer `id`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` (and counts a drop) if the queue is full or the
    /// writer has gone away.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Serialize and queue a relay event.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(peer_id = %self.id, kind = message.kind(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Whether the socket writer is still draining this queue.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Total frames dropped for this peer.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
