//! Resolve a validated request against a registry and invoke it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::callback::ResultCallback;
use crate::errors::Fault;
use crate::registry::{FunctionRegistry, Invoker};
use crate::transport::Transport;
use crate::types::{RequestId, RpcRequest, RpcResponse};

/// Metric label for names missing from the registry, so caller-chosen
/// names never create new series.
pub const UNKNOWN_METHOD: &str = "<unknown>";

/// What dispatching a request produced.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// A response ready to send now.
    Immediate(RpcResponse),
    /// An Async procedure holds the callback; it answers over `transport` later.
    Deferred {
        /// The request awaiting its callback.
        id: RequestId,
    },
}

/// Dispatch a request.
///
/// Sync procedures run to completion on the calling thread and their outcome
/// becomes an [`Dispatch::Immediate`] response; a panic is reported as a fault.
/// Async procedures receive a [`ResultCallback`] bound to `transport` and the
/// call returns [`Dispatch::Deferred`]. If an Async procedure panics before
/// using its callback, the request is answered with a fault.
pub fn dispatch(
    request: RpcRequest,
    registry: &FunctionRegistry,
    transport: &Arc<dyn Transport>,
) -> Dispatch {
    let RpcRequest { id, method, params } = request;

    let Some(entry) = registry.lookup(&method) else {
        counter!("rpc_requests_total", "method" => UNKNOWN_METHOD).increment(1);
        counter!("rpc_errors_total", "method" => UNKNOWN_METHOD, "error_type" => "function_not_found")
            .increment(1);
        warn!(%id, %method, conn_id = transport.id(), "unknown procedure");
        return Dispatch::Immediate(RpcResponse::not_found(id));
    };

    counter!("rpc_requests_total", "method" => method.clone()).increment(1);
    debug!(%id, %method, mode = ?entry.mode(), params = params.len(), "<-- request");

    match entry.invoker() {
        Invoker::Sync(procedure) => {
            let start = Instant::now();
            let outcome = match catch_unwind(AssertUnwindSafe(|| procedure.call(params))) {
                Ok(outcome) => outcome,
                Err(payload) => Err(Fault::from_panic(payload.as_ref())),
            };
            histogram!("rpc_request_duration_seconds", "method" => method.clone())
                .record(start.elapsed().as_secs_f64());

            if let Err(ref fault) = outcome {
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => "fault").increment(1);
                debug!(%id, %method, %fault, "--> failure");
            } else {
                debug!(%id, %method, "--> response");
            }
            Dispatch::Immediate(RpcResponse::from_result(id, outcome))
        }
        Invoker::Async(procedure) => {
            let (reply, pending) = ResultCallback::new(id.clone(), method.clone(), transport.clone());
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| procedure.call(params, reply))) {
                let fault = Fault::from_panic(payload.as_ref());
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => "fault").increment(1);
                warn!(%id, %method, %fault, "async procedure panicked");
                let _ = pending.fail_if_pending(fault);
            }
            Dispatch::Deferred { id }
        }
    }
}
