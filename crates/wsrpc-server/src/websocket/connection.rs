//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wsrpc_core::Transport;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// A connected WebSocket client, as seen by the dispatch engine.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task; a full or closed queue drops the frame.
pub struct ClientConnection {
    id: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
    /// Cancelled when the connection should close.
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a connection whose close token is a child of `parent`.
    pub fn new(id: String, tx: mpsc::Sender<String>, parent: &CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: parent.child_token(),
        }
    }

    /// Unique connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or other frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Duration since the last activity (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the session to close this connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether close has been requested (directly or by server shutdown).
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection should close.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Transport for ClientConnection {
    fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue a frame for the writer task.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    fn send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "connection closed",
                };
                warn!(conn_id = %self.id, reason, "dropping outbound frame");
                false
            }
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("dropped_messages", &self.drop_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
