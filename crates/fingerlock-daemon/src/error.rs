//! Error types for the Fingerlock daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur while talking to collaborators
///
/// None of these escape the session's caller-facing operations; they end up
/// as status text plus a retry, escalate or abandon decision.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// System bus unavailable
    #[error("Failed to connect to system bus: {0}")]
    Bus(String),

    /// Fingerprint daemon manager object unavailable
    #[error("Failed to get Fprintd manager: {0}")]
    Manager(String),

    /// A device call failed
    #[error("{0}")]
    Device(String),

    /// Device reset helper failed
    #[error("Device reset failed: {0}")]
    Reset(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A call was not answered in time
    #[error("Operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

#[cfg(feature = "system-bus")]
impl From<zbus::Error> for DaemonError {
    fn from(e: zbus::Error) -> Self {
        DaemonError::Device(e.to_string())
    }
}
