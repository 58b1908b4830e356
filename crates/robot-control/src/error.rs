//! Error types for control channel operations

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a control channel.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The robot could not be reached at connect time.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The established connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The robot closed the connection.
    #[error("control connection closed by peer")]
    Closed,

    /// A command or read was attempted before `connect`.
    #[error("control channel is not connected")]
    NotConnected,

    /// No complete event arrived within the read timeout.
    #[error("no event received within {0:?}")]
    Timeout(Duration),

    /// Garbled or unexpected data on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The control URI could not be parsed.
    #[error("invalid control address: {0}")]
    InvalidAddress(String),
}

impl ControlError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        ControlError::Protocol(detail.into())
    }

    /// Whether this is a read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::Timeout(_))
    }

    /// Whether the caller may keep reading after this error.
    ///
    /// Timeouts and I/O class failures are retryable; protocol errors,
    /// connect failures and bad addresses are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::Timeout(_)
                | ControlError::Io(_)
                | ControlError::Closed
                | ControlError::NotConnected
        )
    }
}

/// Result type for control channel operations
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = ControlError::Timeout(Duration::from_millis(200));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_errors_are_retryable_but_not_timeouts() {
        let err = ControlError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.is_retryable());
        assert!(!err.is_timeout());
        assert!(ControlError::Closed.is_retryable());
    }

    #[test]
    fn test_protocol_and_connect_errors_are_fatal() {
        assert!(!ControlError::protocol("garbled").is_retryable());

        let err = ControlError::Connect {
            address: "localhost:11642".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("localhost:11642"));
    }
}
