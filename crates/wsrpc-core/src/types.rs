//! Wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{self, Fault};
use crate::params::Params;

/// Caller-chosen correlation token, echoed verbatim.
pub type RequestId = Value;

/// Validated request envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcRequest {
    /// Echoed in the response.
    pub id: RequestId,
    /// Fully-qualified procedure name (e.g. `m.add`).
    pub method: String,
    /// Positional arguments.
    pub params: Params,
}

/// Why an inbound frame did not produce an [`RpcRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    /// The frame's `id`, or `null` when unavailable.
    pub id: RequestId,
    /// Short reason for logs.
    pub reason: &'static str,
}

/// Loose shape of an inbound frame, before validation.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
}

impl RpcRequest {
    /// Build a request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Params::new(params),
        }
    }

    /// Parse and validate a raw text frame.
    ///
    /// The frame must be a JSON object carrying a non-empty string `method`
    /// and an array `params` (possibly empty). `id` may be any value and
    /// defaults to `null`.
    pub fn parse(text: &str) -> Result<Self, Rejection> {
        let malformed = Rejection {
            id: Value::Null,
            reason: "malformed envelope",
        };
        let envelope: Envelope = match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => {
                serde_json::from_value(value).map_err(|_| malformed.clone())?
            }
            Ok(_) | Err(_) => return Err(malformed),
        };
        let id = envelope.id;

        let method = match envelope.method {
            Some(Value::String(m)) if !m.is_empty() => m,
            Some(_) => {
                return Err(Rejection {
                    id,
                    reason: "method is not a non-empty string",
                });
            }
            None => return Err(Rejection { id, reason: "missing method" }),
        };

        let params = match envelope.params {
            Some(Value::Array(values)) => Params::new(values),
            Some(_) => {
                return Err(Rejection {
                    id,
                    reason: "params is not an array",
                });
            }
            None => return Err(Rejection { id, reason: "missing params" }),
        };

        Ok(Self { id, method, params })
    }
}

/// Outgoing response envelope.
///
/// `result` and `error` are always serialized, as `null` when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: RequestId,
    /// Procedure return value.
    pub result: Option<Value>,
    /// Failure description.
    pub error: Option<String>,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// Response for a procedure fault.
    pub fn fault(id: RequestId, fault: &Fault) -> Self {
        Self::error(id, fault.description())
    }

    /// Response for a malformed envelope.
    pub fn invalid_request(id: RequestId) -> Self {
        Self::error(id, errors::INVALID_REQUEST)
    }

    /// Response for an unregistered method.
    pub fn not_found(id: RequestId) -> Self {
        Self::error(id, errors::FUNCTION_NOT_FOUND)
    }

    /// Response from a procedure outcome.
    pub fn from_result(id: RequestId, outcome: Result<Value, Fault>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(fault) => Self::fault(id, &fault),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
