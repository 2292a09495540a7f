//! Prometheus exposition for dispatch and connection metrics.
//!
//! The dispatch engine records `rpc_*` series through the `metrics` facade;
//! the server records `ws_*` series. Both land in whichever recorder is
//! installed here.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Calls received (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// Failed calls (counter, labels: method, `error_type`).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Time from dispatch to response (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// Async calls whose callback has not fired yet (gauge).
pub const RPC_ASYNC_PENDING: &str = "rpc_async_pending";
/// Connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Outbound frames dropped on a full or closed send queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";

/// Buckets for call latency; most procedures answer well under a second.
const RPC_DURATION_BUCKETS: &[f64] = &[
    0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0,
];

/// Buckets for connection lifetime, from seconds to a day.
const CONNECTION_DURATION_BUCKETS: &[f64] = &[
    1.0, 10.0, 60.0, 300.0, 1_800.0, 3_600.0, 21_600.0, 86_400.0,
];

fn builder() -> Result<PrometheusBuilder, ServerError> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RPC_REQUEST_DURATION_SECONDS.to_owned()),
            RPC_DURATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(WS_CONNECTION_DURATION_SECONDS.to_owned()),
            CONNECTION_DURATION_BUCKETS,
        )?)
}

fn describe() {
    describe_counter!(RPC_REQUESTS_TOTAL, "Calls received");
    describe_counter!(RPC_ERRORS_TOTAL, "Calls answered with an error");
    describe_histogram!(RPC_REQUEST_DURATION_SECONDS, Unit::Seconds, "Dispatch to response");
    describe_gauge!(RPC_ASYNC_PENDING, "Async calls awaiting their callback");
    describe_counter!(WS_CONNECTIONS_TOTAL, "Connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "Connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Open connections");
    describe_counter!(WS_CONNECTIONS_REJECTED_TOTAL, "Upgrades refused at the limit");
    describe_counter!(WS_SEND_DROPS_TOTAL, "Outbound frames dropped");
    describe_histogram!(WS_CONNECTION_DURATION_SECONDS, Unit::Seconds, "Connection lifetime");
}

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The returned handle
/// backs `GET /metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = builder()?.install_recorder()?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
