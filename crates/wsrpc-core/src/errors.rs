//! Wire error strings and the procedure fault type.

// ── Error strings ───────────────────────────────────────────────────

/// Envelope is missing `method` or `params`, or could not be parsed.
pub const INVALID_REQUEST: &str = "Invalid Request";
/// Method is not registered on this connection.
pub const FUNCTION_NOT_FOUND: &str = "Function not found";
/// Procedure failed without describing why.
pub const UNSPECIFIED_FAILURE: &str = "Unspecified Failure";

/// Failure reported by a procedure.
///
/// The `Display` output is exactly what lands in the response's `error` field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Failure with a description.
    #[error("{0}")]
    Message(String),

    /// Failure without a description.
    #[error("Unspecified Failure")]
    Unspecified,
}

impl Fault {
    /// Build a fault from a description. An empty description is unspecified.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            Self::Unspecified
        } else {
            Self::Message(message)
        }
    }

    /// Fault without a description.
    pub fn unspecified() -> Self {
        Self::Unspecified
    }

    /// Fault for a procedure that panicked during invocation.
    pub fn panicked(detail: &str) -> Self {
        Self::Message(format!("procedure panicked: {detail}"))
    }

    /// Text sent in the response's `error` field. Never empty.
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Build a fault from a panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Self::panicked(&detail)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
