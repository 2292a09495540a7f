//! Server and configuration error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g., zero where a positive value is required).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Other socket I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The global tracing subscriber was already set.
    #[error("failed to initialize logging: {0}")]
    Telemetry(#[from] tracing_subscriber::util::TryInitError),
    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
