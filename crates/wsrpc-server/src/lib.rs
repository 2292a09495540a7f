//! # wsrpc-server
//!
//! Axum HTTP + `WebSocket` host for the `wsrpc-core` dispatch engine.
//!
//! - `GET /ws`: one [`wsrpc_core::Session`] per accepted connection, with the
//!   host's exposure hook run before any frame is read
//! - `GET /health` and `GET /metrics` (Prometheus text format)
//! - Layered settings: defaults, JSON file, `WSRPC_*` environment variables
//! - Heartbeat pings, connection limits, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod loader;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod websocket;

pub use config::{LoggingConfig, ServerConfig, Settings};
pub use errors::{ConfigError, ServerError};
pub use server::RpcServer;
