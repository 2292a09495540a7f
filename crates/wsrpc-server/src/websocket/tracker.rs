//! Live connection set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{RwLock, watch};
use tracing::debug;

use super::connection::ClientConnection;

/// Tracks every open connection for health reporting, admission limits
/// and shutdown.
pub struct ConnectionTracker {
    /// Connected clients indexed by connection ID.
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
    /// Current connection count, observable by shutdown.
    count: watch::Sender<usize>,
    /// Admitted sessions, counted from before the upgrade until cleanup.
    admitted: AtomicUsize,
}

/// A reserved connection slot, released on drop.
pub struct Admission {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let _ = self.tracker.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("admitted", &self.tracker.admitted())
            .finish()
    }
}

impl ConnectionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            count: watch::Sender::new(0),
            admitted: AtomicUsize::new(0),
        }
    }

    /// Reserve a slot if fewer than `limit` sessions are admitted.
    ///
    /// The slot is held from the upgrade request until the returned
    /// [`Admission`] is dropped, so concurrent upgrades cannot overshoot.
    pub fn try_admit(self: &Arc<Self>, limit: usize) -> Option<Admission> {
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Admission {
                tracker: self.clone(),
            })
    }

    /// Sessions currently holding an [`Admission`].
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id().to_owned(), connection);
        let _ = self.count.send_replace(conns.len());
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
        let _ = self.count.send_replace(conns.len());
    }

    /// Number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// IDs of active connections (sorted).
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ask every connection to close.
    pub async fn close_all(&self) {
        let conns = self.connections.read().await;
        debug!(count = conns.len(), "closing all connections");
        for conn in conns.values() {
            conn.close();
        }
    }

    /// Resolve once no connections remain.
    pub async fn wait_until_empty(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn make_connection(id: &str) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new(id.into(), tx, &CancellationToken::new()))
    }

    #[tokio::test]
    async fn starts_empty() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.connection_count().await, 0);
        assert!(tracker.ids().await.is_empty());
    }

    #[tokio::test]
    async fn add_and_remove() {
        let tracker = ConnectionTracker::new();
        tracker.add(make_connection("b")).await;
        tracker.add(make_connection("a")).await;
        assert_eq!(tracker.connection_count().await, 2);
        assert_eq!(tracker.ids().await, vec!["a", "b"]);

        tracker.remove("a").await;
        assert_eq!(tracker.ids().await, vec!["b"]);
    }

    #[test]
    fn admission_is_capped_and_released_on_drop() {
        let tracker = Arc::new(ConnectionTracker::new());
        let first = tracker.try_admit(2).unwrap();
        let second = tracker.try_admit(2).unwrap();
        assert!(tracker.try_admit(2).is_none());
        assert_eq!(tracker.admitted(), 2);

        drop(first);
        assert_eq!(tracker.admitted(), 1);
        let third = tracker.try_admit(2);
        assert!(third.is_some());

        drop(second);
        drop(third);
        assert_eq!(tracker.admitted(), 0);
    }

    #[test]
    fn zero_limit_admits_nobody() {
        let tracker = Arc::new(ConnectionTracker::new());
        assert!(tracker.try_admit(0).is_none());
        assert_eq!(tracker.admitted(), 0);
    }

    #[test]
    fn concurrent_admission_never_overshoots() {
        let tracker = Arc::new(ConnectionTracker::new());
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let _ = barrier.wait();
                    tracker.try_admit(3)
                })
            })
            .collect();
        let admissions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(admissions.iter().filter(|a| a.is_some()).count(), 3);
        assert_eq!(tracker.admitted(), 3);
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let tracker = ConnectionTracker::new();
        tracker.add(make_connection("a")).await;
        tracker.remove("zzz").await;
        assert_eq!(tracker.connection_count().await, 1);
    }

    #[tokio::test]
    async fn re_adding_same_id_replaces() {
        let tracker = ConnectionTracker::new();
        tracker.add(make_connection("a")).await;
        tracker.add(make_connection("a")).await;
        assert_eq!(tracker.connection_count().await, 1);
    }

    #[tokio::test]
    async fn close_all_closes_every_connection() {
        let tracker = ConnectionTracker::new();
        let a = make_connection("a");
        let b = make_connection("b");
        tracker.add(a.clone()).await;
        tracker.add(b.clone()).await;
        tracker.close_all().await;
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_immediately_when_empty() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_until_empty())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_after_last_removal() {
        let tracker = Arc::new(ConnectionTracker::new());
        tracker.add(make_connection("a")).await;

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_until_empty().await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        tracker.remove("a").await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
