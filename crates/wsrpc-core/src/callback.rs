//! Single-use result callback handed to Async procedures.
//!
//! The callback captures the request id and the connection. Consuming it
//! with [`ResultCallback::ok`] or [`ResultCallback::fail`] writes exactly one
//! response envelope; afterwards the callback no longer exists, so a second
//! response for the same request cannot be produced.
//!
//! The callback is `Send`: a procedure may move it into a spawned task and
//! reply from there, after later frames on the same connection have already
//! been processed.

use std::sync::Arc;
use std::time::Instant;

use metrics::{gauge, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Fault;
use crate::transport::{Transport, deliver};
use crate::types::{RequestId, RpcResponse};

/// Everything needed to answer one pending request.
struct Completion {
    id: RequestId,
    method: String,
    transport: Arc<dyn Transport>,
    started: Instant,
}

impl Completion {
    fn respond(self, outcome: Result<Value, Fault>) -> bool {
        gauge!("rpc_async_pending").decrement(1.0);
        histogram!("rpc_request_duration_seconds", "method" => self.method.clone())
            .record(self.started.elapsed().as_secs_f64());

        if let Err(ref fault) = outcome {
            debug!(id = %self.id, method = %self.method, %fault, "async failure");
        } else {
            debug!(id = %self.id, method = %self.method, "async response");
        }
        let response = RpcResponse::from_result(self.id, outcome);
        deliver(self.transport.as_ref(), &response)
    }
}

/// Shared between the callback and the dispatcher's [`PendingReply`].
struct SlotState {
    completion: Option<Completion>,
    /// The dispatcher still holds its `PendingReply`.
    watched: bool,
}

type Slot = Arc<Mutex<SlotState>>;

/// Continuation passed as the trailing argument of an Async procedure.
pub struct ResultCallback {
    slot: Slot,
    id: RequestId,
}

/// Dispatcher-side handle on a callback that has been handed out.
pub(crate) struct PendingReply {
    slot: Slot,
}

impl ResultCallback {
    pub(crate) fn new(
        id: RequestId,
        method: String,
        transport: Arc<dyn Transport>,
    ) -> (Self, PendingReply) {
        gauge!("rpc_async_pending").increment(1.0);
        let slot = Arc::new(Mutex::new(SlotState {
            completion: Some(Completion {
                id: id.clone(),
                method,
                transport,
                started: Instant::now(),
            }),
            watched: true,
        }));
        (
            Self {
                slot: slot.clone(),
                id,
            },
            PendingReply { slot },
        )
    }

    /// The request this callback answers.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Reply with a result value.
    ///
    /// Returns `false` if the response could not be written to the connection.
    pub fn ok(self, value: Value) -> bool {
        self.complete(Ok(value))
    }

    /// Reply with a failure.
    pub fn fail(self, fault: impl Into<Fault>) -> bool {
        self.complete(Err(fault.into()))
    }

    /// Reply with either arm.
    pub fn complete(self, outcome: Result<Value, Fault>) -> bool {
        let completion = self.slot.lock().completion.take();
        completion.is_some_and(|c| c.respond(outcome))
    }
}

impl std::fmt::Debug for ResultCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCallback")
            .field("id", &self.id)
            .field("pending", &self.slot.lock().completion.is_some())
            .finish()
    }
}

impl Drop for ResultCallback {
    fn drop(&mut self) {
        let completion = {
            let mut state = self.slot.lock();
            // Unwinding inside the dispatcher: it answers through `PendingReply`.
            if state.watched && std::thread::panicking() {
                return;
            }
            state.completion.take()
        };
        if let Some(completion) = completion {
            gauge!("rpc_async_pending").decrement(1.0);
            warn!(
                id = %completion.id,
                method = %completion.method,
                conn_id = completion.transport.id(),
                unwinding = std::thread::panicking(),
                "result callback dropped without a reply"
            );
        }
    }
}

impl PendingReply {
    /// Answer with `fault` unless the callback already replied or was dropped.
    pub(crate) fn fail_if_pending(&self, fault: Fault) -> bool {
        let completion = self.slot.lock().completion.take();
        completion.is_some_and(|c| c.respond(Err(fault)))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.slot.lock().watched = false;
    }
}
