//! # wsrpc-core
//!
//! Named-procedure dispatch over a message-oriented connection.
//!
//! - [`FunctionRegistry`]: per-connection map from procedure name to [`Entry`]
//! - [`Session`]: owns one connection's registry, runs the exposure hook on
//!   accept, and routes every inbound frame through [`handle_message`]
//! - [`Invoker`]: Sync procedures return `Result<Value, Fault>`; Async
//!   procedures receive a single-use [`ResultCallback`] as their last argument
//!
//! The wire envelopes are plain JSON objects:
//!
//! ```text
//! request:  {"id": <any>, "method": "m.add", "params": [2, 3]}
//! response: {"id": <echo>, "result": 5, "error": null}
//! ```

#![deny(unsafe_code)]

pub mod callback;
pub mod dispatch;
pub mod errors;
pub mod handler;
pub mod params;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use callback::ResultCallback;
pub use dispatch::{Dispatch, dispatch};
pub use errors::Fault;
pub use handler::{HandleResult, handle_message};
pub use params::Params;
pub use registry::{
    AsyncProcedure, Entry, FunctionRegistry, Invoker, Mode, Module, SYNC_MARKER, SyncProcedure,
};
pub use session::{ExposeHook, Outcome, Session};
pub use transport::Transport;
pub use types::{RequestId, RpcRequest, RpcResponse};
