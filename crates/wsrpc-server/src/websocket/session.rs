//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wsrpc_core::{ExposeHook, Outcome, Session, Transport};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::tracker::{Admission, ConnectionTracker};
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Shared inputs every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Connection limits and heartbeat timing.
    pub config: Arc<ServerConfig>,
    /// Host hook that populates each connection's registry.
    pub hook: Arc<dyn ExposeHook>,
    /// Live connection set.
    pub tracker: Arc<ConnectionTracker>,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Builds the connection's registry by running the exposure hook
/// 2. Forwards queued outbound frames and sends periodic pings
/// 3. Closes the connection if the client stops responding
/// 4. Feeds inbound text frames to the dispatch engine in arrival order
/// 5. Cleans up on disconnect or shutdown, releasing the admission slot
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: String,
    ctx: SessionContext,
    admission: Admission,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(ctx.config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx, &ctx.shutdown));
    let transport: Arc<dyn Transport> = connection.clone();

    // Exposure completes before the first frame is read.
    let session = Session::accept(transport, ctx.hook.as_ref());

    info!(
        procedures = session.registry().len(),
        "client connected"
    );
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.tracker.add(connection.clone()).await;

    let close = connection.close_token();

    // Outbound forwarder with periodic ping frames.
    let ping_every = ctx.config.heartbeat_interval();
    let writer_close = close.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_close.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Liveness watchdog.
    let heartbeat_conn = connection.clone();
    let heartbeat_cancel = close.clone();
    let interval = ctx.config.heartbeat_interval();
    let timeout = ctx.config.heartbeat_timeout();
    let heartbeat = tokio::spawn(async move {
        if run_heartbeat(heartbeat_conn.clone(), interval, timeout, heartbeat_cancel).await
            == HeartbeatResult::TimedOut
        {
            warn!(
                conn_id = heartbeat_conn.id(),
                idle_secs = heartbeat_conn.last_seen_elapsed().as_secs(),
                "client unresponsive, disconnecting"
            );
            heartbeat_conn.close();
        }
    });

    // Process incoming frames
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = close.cancelled() => {
                debug!("close requested");
                break;
            }
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read error");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match session.on_message(&text) {
            Outcome::Responded {
                delivered: false,
                response,
            } => {
                info!(id = %response.id, "failed to enqueue response (channel full or closed)");
            }
            Outcome::Responded { .. } => {}
            Outcome::Pending { id } => debug!(%id, "awaiting async callback"),
        }
    }

    // Clean up
    connection.close();
    let _ = heartbeat.await;
    let _ = writer.await;
    ctx.tracker.remove(&conn_id).await;
    drop(admission);

    let age = connection.age();
    info!(
        dropped = connection.drop_count(),
        age_secs = age.as_secs(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}
