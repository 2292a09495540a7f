//! Per-connection dispatch state.
//!
//! A [`Session`] exists only once its exposure hook has returned, so every
//! inbound frame sees the complete registry.

use std::sync::Arc;

use tracing::{debug, info};

use crate::dispatch::Dispatch;
use crate::handler::handle_message;
use crate::registry::FunctionRegistry;
use crate::transport::{Transport, deliver};
use crate::types::{RequestId, RpcResponse};

/// Host callback that populates a new connection's registry.
pub trait ExposeHook: Send + Sync {
    /// Register procedures for the connection behind `transport`.
    fn expose(&self, transport: &Arc<dyn Transport>, registry: &mut FunctionRegistry);
}

impl<F> ExposeHook for F
where
    F: Fn(&Arc<dyn Transport>, &mut FunctionRegistry) + Send + Sync,
{
    fn expose(&self, transport: &Arc<dyn Transport>, registry: &mut FunctionRegistry) {
        self(transport, registry);
    }
}

/// What [`Session::on_message`] did with a frame.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// A response was written (or attempted) immediately.
    Responded {
        /// The response envelope.
        response: RpcResponse,
        /// Whether the transport accepted the frame.
        delivered: bool,
    },
    /// An Async procedure holds the callback for this request.
    Pending {
        /// The request awaiting its callback.
        id: RequestId,
    },
}

/// One accepted connection and the procedures exposed on it.
pub struct Session {
    transport: Arc<dyn Transport>,
    registry: FunctionRegistry,
}

impl Session {
    /// Accept a connection: build its registry and run `hook` over it.
    pub fn accept(transport: Arc<dyn Transport>, hook: &dyn ExposeHook) -> Self {
        let mut registry = FunctionRegistry::new();
        hook.expose(&transport, &mut registry);
        info!(
            conn_id = transport.id(),
            procedures = registry.len(),
            "connection accepted"
        );
        Self {
            transport,
            registry,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &str {
        self.transport.id()
    }

    /// The connection's registry.
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// The connection's transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Process one inbound text frame, sending any immediate response.
    pub fn on_message(&self, raw: &str) -> Outcome {
        let result = handle_message(raw, &self.registry, &self.transport);
        match result.dispatch {
            Dispatch::Immediate(response) => {
                let delivered = deliver(self.transport.as_ref(), &response);
                if !delivered {
                    debug!(conn_id = self.id(), id = %response.id, "response not delivered");
                }
                Outcome::Responded {
                    response,
                    delivered,
                }
            }
            Dispatch::Deferred { id } => Outcome::Pending { id },
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::ResultCallback;
    use crate::errors::Fault;
    use crate::params::Params;
    use crate::registry::{Mode, Module};
    use crate::transport::test_support::RecordingTransport;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    struct M;

    impl Module for M {
        fn members(&self) -> &[&str] {
            &["sync_add", "echo"]
        }

        fn call(&self, member: &str, params: Params) -> Result<Value, Fault> {
            assert_eq!(member, "sync_add");
            let a: i64 = params.required(0)?;
            let b: i64 = params.required(1)?;
            Ok(json!(a + b))
        }

        fn call_async(&self, member: &str, params: Params, reply: ResultCallback) {
            assert_eq!(member, "echo");
            let _ = reply.ok(params.get(0).cloned().unwrap_or(Value::Null));
        }
    }

    fn accept_with(hook: &dyn ExposeHook) -> (Session, Arc<RecordingTransport>) {
        let rec = RecordingTransport::new();
        let session = Session::accept(rec.clone(), hook);
        (session, rec)
    }

    fn module_hook(_t: &Arc<dyn Transport>, reg: &mut FunctionRegistry) {
        let _ = reg.expose_module("m", Arc::new(M));
    }

    // ── Scenario ────────────────────────────────────────────────────

    #[test]
    fn module_scenario() {
        let (session, rec) = accept_with(&module_hook);
        assert_eq!(session.registry().lookup("m.add").unwrap().mode(), Mode::Sync);
        assert_eq!(session.registry().lookup("m.echo").unwrap().mode(), Mode::Async);

        let out = session.on_message(r#"{"id":1,"method":"m.add","params":[2,3]}"#);
        assert_matches!(out, Outcome::Responded { delivered: true, .. });

        let out = session.on_message(r#"{"id":2,"method":"m.echo","params":["hi"]}"#);
        assert_eq!(out, Outcome::Pending { id: json!(2) });

        assert_eq!(
            rec.frames(),
            vec![
                json!({"id": 1, "result": 5, "error": null}),
                json!({"id": 2, "result": "hi", "error": null}),
            ]
        );
    }

    // ── Exposure ordering ───────────────────────────────────────────

    #[test]
    fn hook_registrations_visible_to_first_message() {
        let hook = |_t: &Arc<dyn Transport>, reg: &mut FunctionRegistry| {
            reg.expose_sync("first", |_p: Params| Ok(json!("ready")));
        };
        let (session, rec) = accept_with(&hook);
        let _ = session.on_message(r#"{"id":0,"method":"first","params":[]}"#);
        assert_eq!(rec.frames()[0]["result"], "ready");
    }

    #[test]
    fn hook_receives_the_connection() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let hook = move |t: &Arc<dyn Transport>, _reg: &mut FunctionRegistry| {
            *sink.lock() = Some(t.id().to_owned());
        };
        let (session, _rec) = accept_with(&hook);
        assert_eq!(seen.lock().as_deref(), Some(session.id()));
    }

    #[test]
    fn hook_registering_nothing() {
        let hook = |_t: &Arc<dyn Transport>, _reg: &mut FunctionRegistry| {};
        let (session, rec) = accept_with(&hook);
        assert!(session.registry().is_empty());
        let _ = session.on_message(r#"{"id":1,"method":"m.add","params":[]}"#);
        assert_eq!(rec.frames()[0]["error"], "Function not found");
    }

    #[test]
    fn registries_are_per_connection() {
        let counter = Arc::new(Mutex::new(0_u32));
        let c = counter.clone();
        let hook = move |_t: &Arc<dyn Transport>, reg: &mut FunctionRegistry| {
            let mut n = c.lock();
            *n += 1;
            if *n == 1 {
                reg.expose_sync("only.first", |_p: Params| Ok(Value::Null));
            }
        };
        let (first, _) = accept_with(&hook);
        let (second, _) = accept_with(&hook);
        assert!(first.registry().has_method("only.first"));
        assert!(!second.registry().has_method("only.first"));
    }

    // ── Responses ───────────────────────────────────────────────────

    #[test]
    fn overwrite_dispatches_second() {
        let hook = |_t: &Arc<dyn Transport>, reg: &mut FunctionRegistry| {
            reg.expose_sync("m.f", |_p: Params| Ok(json!(1)));
            reg.expose_sync("m.f", |_p: Params| Ok(json!(2)));
        };
        let (session, rec) = accept_with(&hook);
        let _ = session.on_message(r#"{"id":9,"method":"m.f","params":[]}"#);
        assert_eq!(rec.frames(), vec![json!({"id": 9, "result": 2, "error": null})]);
    }

    #[test]
    fn invalid_request_response_is_sent() {
        let (session, rec) = accept_with(&module_hook);
        let out = session.on_message(r#"{"id":3,"method":"m.add"}"#);
        assert_matches!(out, Outcome::Responded { ref response, .. } if !response.is_success());
        assert_eq!(
            rec.frames(),
            vec![json!({"id": 3, "result": null, "error": "Invalid Request"})]
        );
    }

    #[test]
    fn async_response_waits_for_callback() {
        let stash: Arc<Mutex<Option<ResultCallback>>> = Arc::new(Mutex::new(None));
        let held = stash.clone();
        let hook = move |_t: &Arc<dyn Transport>, reg: &mut FunctionRegistry| {
            let held = held.clone();
            reg.expose_async("m.slow", move |_p: Params, reply: ResultCallback| {
                *held.lock() = Some(reply);
            });
            reg.expose_sync("m.fast", |_p: Params| Ok(json!("fast")));
        };
        let (session, rec) = accept_with(&hook);

        let out = session.on_message(r#"{"id":"a","method":"m.slow","params":[]}"#);
        assert_eq!(out, Outcome::Pending { id: json!("a") });
        assert_eq!(rec.count(), 0);

        // A later request completes first.
        let _ = session.on_message(r#"{"id":"b","method":"m.fast","params":[]}"#);
        let reply = stash.lock().take().unwrap();
        assert!(reply.ok(json!(42)));

        let frames = rec.frames();
        assert_eq!(frames[0]["id"], "b");
        assert_eq!(frames[1], json!({"id": "a", "result": 42, "error": null}));
    }

    #[test]
    fn closed_transport_reports_undelivered() {
        let session = Session::accept(RecordingTransport::closed(), &module_hook);
        let out = session.on_message(r#"{"id":1,"method":"m.add","params":[1,1]}"#);
        assert_matches!(out, Outcome::Responded { delivered: false, .. });
    }
}
