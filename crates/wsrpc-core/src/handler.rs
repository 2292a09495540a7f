//! Inbound frame handling: parse the envelope, then dispatch.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::dispatch::{Dispatch, dispatch};
use crate::registry::FunctionRegistry;
use crate::transport::Transport;
use crate::types::{RpcRequest, RpcResponse};

/// Result of handling one inbound frame.
#[derive(Debug, PartialEq)]
pub struct HandleResult {
    /// The method named by the frame (`None` if the envelope was rejected).
    pub method: Option<String>,
    /// What dispatching produced.
    pub dispatch: Dispatch,
}

impl HandleResult {
    /// The response to send now, if any.
    pub fn immediate(&self) -> Option<&RpcResponse> {
        match &self.dispatch {
            Dispatch::Immediate(response) => Some(response),
            Dispatch::Deferred { .. } => None,
        }
    }
}

/// Handle one inbound text frame.
///
/// Invalid envelopes produce an `Invalid Request` response echoing whatever
/// `id` could be recovered. Nothing is written to `transport` here; only
/// Async procedures use it, through their callback.
#[instrument(skip_all, fields(method))]
pub fn handle_message(
    message: &str,
    registry: &FunctionRegistry,
    transport: &Arc<dyn Transport>,
) -> HandleResult {
    let request = match RpcRequest::parse(message) {
        Ok(r) => r,
        Err(rejection) => {
            counter!("rpc_errors_total", "method" => "", "error_type" => "invalid_request")
                .increment(1);
            warn!(
                conn_id = transport.id(),
                id = %rejection.id,
                reason = rejection.reason,
                "invalid request"
            );
            return HandleResult {
                method: None,
                dispatch: Dispatch::Immediate(RpcResponse::invalid_request(rejection.id)),
            };
        }
    };

    let method = request.method.clone();
    let _ = tracing::Span::current().record("method", method.as_str());
    debug!(id = %request.id, "dispatching RPC");

    HandleResult {
        method: Some(method),
        dispatch: dispatch(request, registry, transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::ResultCallback;
    use crate::errors::Fault;
    use crate::params::Params;
    use crate::transport::test_support::RecordingTransport;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn setup() -> (FunctionRegistry, Arc<RecordingTransport>, Arc<dyn Transport>) {
        let mut reg = FunctionRegistry::new();
        reg.expose_sync("m.add", |p: Params| {
            let a: i64 = p.required(0)?;
            let b: i64 = p.required(1)?;
            Ok(json!(a + b))
        });
        reg.expose_sync("m.fail", |_p: Params| Err(Fault::unspecified()));
        reg.expose_async("m.echo", |p: Params, reply: ResultCallback| {
            let _ = reply.ok(p.get(0).cloned().unwrap_or(Value::Null));
        });
        let rec = RecordingTransport::new();
        let t: Arc<dyn Transport> = rec.clone();
        (reg, rec, t)
    }

    fn immediate(result: &HandleResult) -> Value {
        serde_json::to_value(result.immediate().unwrap()).unwrap()
    }

    // ── Valid requests ──────────────────────────────────────────────

    #[test]
    fn sync_call_answers_immediately() {
        let (reg, rec, t) = setup();
        let result = handle_message(r#"{"id":1,"method":"m.add","params":[2,3]}"#, &reg, &t);
        assert_eq!(result.method.as_deref(), Some("m.add"));
        assert_eq!(immediate(&result), json!({"id": 1, "result": 5, "error": null}));
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn async_call_is_deferred() {
        let (reg, rec, t) = setup();
        let result = handle_message(r#"{"id":2,"method":"m.echo","params":["hi"]}"#, &reg, &t);
        assert!(result.immediate().is_none());
        assert_matches!(result.dispatch, Dispatch::Deferred { ref id } if *id == json!(2));
        assert_eq!(rec.frames(), vec![json!({"id": 2, "result": "hi", "error": null})]);
    }

    #[test]
    fn sync_failure_without_description() {
        let (reg, _rec, t) = setup();
        let result = handle_message(r#"{"id":4,"method":"m.fail","params":[]}"#, &reg, &t);
        assert_eq!(
            immediate(&result),
            json!({"id": 4, "result": null, "error": "Unspecified Failure"})
        );
    }

    #[test]
    fn unknown_method() {
        let (reg, _rec, t) = setup();
        let result = handle_message(r#"{"id":3,"method":"m.nope","params":[]}"#, &reg, &t);
        assert_eq!(result.method.as_deref(), Some("m.nope"));
        assert_eq!(
            immediate(&result),
            json!({"id": 3, "result": null, "error": "Function not found"})
        );
    }

    // ── Invalid envelopes ───────────────────────────────────────────

    #[test]
    fn missing_params_is_invalid() {
        let (reg, _rec, t) = setup();
        let result = handle_message(r#"{"id":5,"method":"m.add"}"#, &reg, &t);
        assert!(result.method.is_none());
        assert_eq!(
            immediate(&result),
            json!({"id": 5, "result": null, "error": "Invalid Request"})
        );
    }

    #[test]
    fn missing_method_is_invalid() {
        let (reg, _rec, t) = setup();
        let result = handle_message(r#"{"id":6,"params":[]}"#, &reg, &t);
        assert_eq!(immediate(&result)["error"], "Invalid Request");
        assert_eq!(immediate(&result)["id"], 6);
    }

    #[test]
    fn malformed_json_is_invalid_with_null_id() {
        let (reg, rec, t) = setup();
        let result = handle_message("{not json", &reg, &t);
        assert_eq!(
            immediate(&result),
            json!({"id": null, "result": null, "error": "Invalid Request"})
        );
        assert_eq!(rec.count(), 0);
    }

    #[test]
    fn invalid_request_does_not_invoke_anything() {
        let (reg, rec, t) = setup();
        let _ = handle_message(r#"{"id":7,"method":"m.echo","params":"hi"}"#, &reg, &t);
        assert_eq!(rec.count(), 0);
    }
}
