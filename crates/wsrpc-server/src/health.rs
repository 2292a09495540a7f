//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Serving state reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; upgrades are refused.
    ShuttingDown,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Serving state.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Configured connection limit.
    pub max_connections: usize,
}

/// Snapshot the server's state.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    max_connections: usize,
    shutting_down: bool,
) -> HealthResponse {
    let status = if shutting_down {
        HealthStatus::ShuttingDown
    } else {
        HealthStatus::Ok
    };
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        max_connections,
    }
}
