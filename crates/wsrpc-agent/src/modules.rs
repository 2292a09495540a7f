//! Demo procedures exposed on every connection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wsrpc_core::{Fault, FunctionRegistry, Module, Params, ResultCallback, Transport};

/// Arithmetic over JSON numbers.
pub struct MathModule;

/// JSON has no encoding for NaN or infinity.
fn finite(value: f64) -> Result<Value, Fault> {
    if value.is_finite() {
        Ok(json!(value))
    } else {
        Err(Fault::new("result is not a finite number"))
    }
}

impl MathModule {
    fn add(params: &Params) -> Result<Value, Fault> {
        let a: Value = params.required(0)?;
        let b: Value = params.required(1)?;
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            if let Some(sum) = x.checked_add(y) {
                return Ok(json!(sum));
            }
        }
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => finite(x + y),
            _ => Err(Fault::new("operands must be numbers")),
        }
    }

    fn divide(params: &Params) -> Result<Value, Fault> {
        let a: f64 = params.required(0)?;
        let b: f64 = params.required(1)?;
        if b == 0.0 {
            return Err(Fault::new("division by zero"));
        }
        finite(a / b)
    }

    fn sum(params: &Params) -> Result<Value, Fault> {
        let mut total = 0.0;
        for value in params.iter() {
            total += value
                .as_f64()
                .ok_or_else(|| Fault::new("operands must be numbers"))?;
        }
        finite(total)
    }
}

impl Module for MathModule {
    fn members(&self) -> &[&str] {
        &["sync_add", "sync_divide", "sum"]
    }

    fn call(&self, member: &str, params: Params) -> Result<Value, Fault> {
        match member {
            "sync_add" => Self::add(&params),
            "sync_divide" => Self::divide(&params),
            _ => Err(Fault::unspecified()),
        }
    }

    fn call_async(&self, member: &str, params: Params, reply: ResultCallback) {
        let outcome = match member {
            "sum" => Self::sum(&params),
            _ => Err(Fault::unspecified()),
        };
        let _ = reply.complete(outcome);
    }
}

/// Echo and liveness checks.
pub struct EchoModule;

impl Module for EchoModule {
    fn members(&self) -> &[&str] {
        &["echo", "sync_ping"]
    }

    fn call(&self, member: &str, _params: Params) -> Result<Value, Fault> {
        match member {
            "sync_ping" => Ok(json!({
                "pong": true,
                "time": chrono::Utc::now().to_rfc3339(),
            })),
            _ => Err(Fault::unspecified()),
        }
    }

    fn call_async(&self, member: &str, params: Params, reply: ResultCallback) {
        if member != "echo" {
            let _ = reply.fail(Fault::unspecified());
            return;
        }
        let value = params.get(0).cloned().unwrap_or(Value::Null);
        let delay_ms = match params.optional::<u64>(1) {
            Ok(delay) => delay.unwrap_or(0),
            Err(fault) => {
                let _ = reply.fail(fault);
                return;
            }
        };
        let _ = tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            let _ = reply.ok(value);
        });
    }
}

/// Exposure hook for the demo server.
///
/// Publishes `math.*`, `echo.*` and a `system.methods` listing.
pub fn expose_demo(_transport: &Arc<dyn Transport>, registry: &mut FunctionRegistry) {
    let _ = registry.expose_module("math", Arc::new(MathModule));
    let _ = registry.expose_module("echo", Arc::new(EchoModule));

    let mut names = registry.methods();
    names.push("system.methods".to_owned());
    names.sort();
    registry.expose_sync("system.methods", move |_params: Params| Ok(json!(names)));
}
