//! WebSocket connection management, heartbeat, and per-connection sessions.

pub mod connection;
pub mod heartbeat;
pub mod session;
pub mod tracker;
