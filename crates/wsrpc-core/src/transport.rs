//! Outbound side of a connection, as seen by the dispatch engine.

use tracing::error;

use crate::types::RpcResponse;

/// A connection that can write one outbound text frame at a time.
pub trait Transport: Send + Sync {
    /// Connection identifier, used for logging.
    fn id(&self) -> &str;

    /// Queue one text frame. Returns `false` if the frame was dropped.
    fn send(&self, text: String) -> bool;
}

/// Serialize a response and write it to the transport.
pub(crate) fn deliver(transport: &dyn Transport, response: &RpcResponse) -> bool {
    match serde_json::to_string(response) {
        Ok(json) => transport.send(json),
        Err(e) => {
            error!(conn_id = transport.id(), error = %e, "failed to serialize response");
            false
        }
    }
}
