//! Error types for the cluster-state accessor.
//!
//! Three outcomes are deliberately kept apart:
//! - registry failures on calls that assume an available registry are not
//!   errors at all (see `accessor::bridge::assume_available`);
//! - bounded control calls that miss their deadline surface as
//!   [`StateError::Unavailable`], which callers are expected to treat as fatal;
//! - discovery calls that exhaust their wait window surface as
//!   [`StateError::NotFound`] with operator guidance.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the cluster-state crates.
#[derive(Debug, Error)]
pub enum StateError {
    // Registry outcomes
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Registry unavailable: {operation} did not complete within {timeout:?}")]
    Unavailable { operation: String, timeout: Duration },

    #[error("Registry error: {message}")]
    Registry { message: String },

    // Accessor lifecycle
    #[error("Accessor is not connected to the registry")]
    NotConnected,

    #[error("Event loop stopped before {operation} completed")]
    LoopStopped { operation: String },

    #[error("{operation} must not be called from the accessor's event-loop thread")]
    WouldDeadlock { operation: String },

    // Transport
    #[error("Connection to registry at {address} lost")]
    ConnectionLost { address: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Invalid {kind} id: {value}")]
    InvalidId { kind: &'static str, value: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cluster-state operations.
pub type Result<T> = std::result::Result<T, StateError>;

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl StateError {
    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Request timeout
    /// - -32001: Registry unavailable (a bounded call missed its deadline)
    /// - -32002: Entity not found
    /// - -32003: Upstream connection lost
    /// - -32005: Validation error
    ///
    /// Everything else is reported as -32603 (internal error).
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            StateError::Timeout(_) => -32000,
            StateError::Unavailable { .. } => -32001,
            StateError::NotFound { .. } => -32002,
            StateError::ConnectionLost { .. } => -32003,

            StateError::InvalidId { .. } | StateError::Validation { .. } => -32005,

            _ => -32603,
        }
    }

    /// Message carried in a JSON-RPC error object.
    ///
    /// `NotFound` travels without its display prefix so the receiving side
    /// can rebuild the same error.
    pub fn wire_message(&self) -> String {
        match self {
            StateError::NotFound { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from a JSON-RPC error object received over the wire.
    ///
    /// `timeout` is the per-call timeout the caller applied, if any, so a
    /// server-side timeout keeps its duration on the client. Only -32000 comes
    /// back as [`StateError::Timeout`]; a server that lost its own upstream or
    /// missed a deadline is a registry error, not an empty answer.
    pub fn from_rpc_error(code: i32, message: String, timeout: Option<Duration>) -> Self {
        match code {
            -32000 => StateError::Timeout(timeout.unwrap_or_default()),
            -32002 => StateError::NotFound { message },
            -32005 => StateError::Validation {
                field: "request".to_string(),
                message,
            },
            _ => StateError::Registry { message },
        }
    }

    /// Whether the calling process should treat this error as unrecoverable.
    ///
    /// Only bounded control calls that missed their deadline qualify; the
    /// accessor never retries past them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Unavailable { .. })
    }
}
