//! Idle-connection watchdog.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Why [`run_heartbeat`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound frame for `max_missed` consecutive intervals.
    TimedOut,
    /// The connection closed for another reason.
    Cancelled,
}

/// Number of consecutive silent intervals tolerated before timing out.
///
/// `timeout / interval`, clamped to at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let missed = (timeout.as_millis() / interval_ms).max(1);
    u32::try_from(missed).unwrap_or(u32::MAX)
}

/// Watch a connection's liveness flag.
///
/// At each `interval` tick the alive flag is checked and reset. Each tick
/// with no activity since the previous one counts as a miss; activity resets
/// the count. Reaching [`max_missed`] consecutive misses returns
/// [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
