//! Server-wide shutdown signal and connection draining.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::tracker::ConnectionTracker;

/// Default time allowed for connections to drain before giving up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of the accept loop and every session.
///
/// Sessions derive their close tokens from [`ShutdownCoordinator::token`],
/// so cancelling it closes every connection.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator that has not fired.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The server-wide token; session tokens are its children.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`ShutdownCoordinator::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut down and wait for the server task and every connection to finish.
    ///
    /// Returns `false` if `timeout` elapsed first; the server task is then
    /// aborted.
    pub async fn graceful_shutdown(
        &self,
        server: JoinHandle<()>,
        tracker: &ConnectionTracker,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        tracker.close_all().await;
        info!(
            connections = tracker.connection_count().await,
            timeout_secs = timeout.as_secs(),
            "waiting for connections to drain"
        );

        let abort = server.abort_handle();
        let drain = async {
            let _ = server.await;
            tracker.wait_until_empty().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some connections may still be open");
            abort.abort();
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::websocket::connection::ClientConnection;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert!(!ShutdownCoordinator::default().is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let child = t1.child_token();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_server_task() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let server = tokio::spawn(async move { token.cancelled().await });
        let tracker = ConnectionTracker::new();

        assert!(coord.graceful_shutdown(server, &tracker, None).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_connections() {
        let coord = ShutdownCoordinator::new();
        let tracker = Arc::new(ConnectionTracker::new());
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx, &coord.token()));
        tracker.add(conn.clone()).await;

        // Simulated session: leaves the tracker once closed.
        let session_tracker = tracker.clone();
        let close = conn.close_token();
        let _session = tokio::spawn(async move {
            close.cancelled().await;
            session_tracker.remove("c1").await;
        });

        let server = tokio::spawn(async {});
        assert!(coord.graceful_shutdown(server, &tracker, Some(Duration::from_secs(5))).await);
        assert_eq!(tracker.connection_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        // A task that ignores cancellation
        let server = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let tracker = ConnectionTracker::new();

        let drained = coord
            .graceful_shutdown(server, &tracker, Some(Duration::from_millis(100)))
            .await;
        assert!(!drained);
    }
}
