//! Error types for the query gateway.

use thiserror::Error;

/// Result type used throughout the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for gateway operations.
///
/// Every variant is converted to an error envelope at the dispatcher
/// boundary; none may escape to the transport layer as an unhandled fault.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed or incomplete command. Never reaches the executor.
    #[error("decode error: {0}")]
    Decode(String),

    /// The engine reported a SQL or runtime failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// The query was interrupted mid-flight by a cancel request.
    #[error("query was cancelled")]
    Cancelled,

    /// A second execution was registered under a query id whose prior
    /// execution is still live. Surfaced without touching the executor.
    #[error("query id '{0}' is already registered")]
    Conflict(String),

    /// Result cache read/write failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Engine handle could not be opened or cloned.
    #[error("engine error: {0}")]
    Engine(String),

    /// The worker pool is shut down or dropped the reply channel.
    #[error("executor error: {0}")]
    Executor(String),
}

impl GatewayError {
    /// Machine-readable error class, carried on error envelopes so clients
    /// can tell a cancellation apart from an execution failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::Execution(_) => ErrorKind::Execution,
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::Conflict(_) => ErrorKind::Conflict,
            GatewayError::Cache(_) | GatewayError::Engine(_) | GatewayError::Executor(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Error class reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Execution,
    Cancelled,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Execution => "execution",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}
