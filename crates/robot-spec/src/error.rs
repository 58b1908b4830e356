//! Error taxonomy for specification runs.
//!
//! `SpecError` is `Clone` because a single terminal failure is handed to every
//! waiter on the latch.

use std::sync::Arc;
use std::time::Duration;

use robot_control::{ControlError, EventKind};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SpecError {
    #[error("failed to connect to robot at {address}. Is the robot running?")]
    RobotUnreachable {
        address: String,
        #[source]
        source: Arc<ControlError>,
    },

    #[error("{summary}:{description}")]
    RobotError {
        summary: String,
        description: String,
    },

    #[error("unsupported event: {0}")]
    UnsupportedEvent(EventKind),

    #[error("control channel failed: {0}")]
    Control(#[source] Arc<ControlError>),

    #[error("run was aborted before the robot prepared the scripts")]
    AbortedBeforePrepared,

    #[error("script runner stopped unexpectedly: {0}")]
    RunnerPanicked(String),

    #[error("robot behavior did not match expected\n--- expected ---\n{expected}\n--- observed ---\n{observed}")]
    Mismatch { expected: String, observed: String },

    #[error("timed out after {after:?} waiting for the robot to {phase}")]
    AwaitTimeout { phase: &'static str, after: Duration },

    #[error("script runner already started")]
    AlreadyStarted,

    #[error("specification has not been set up")]
    NotSetUp,

    #[error("no scripts declared")]
    NoScripts,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SpecError {
    pub fn unreachable(address: impl Into<String>, source: ControlError) -> Self {
        SpecError::RobotUnreachable {
            address: address.into(),
            source: Arc::new(source),
        }
    }

    /// Whether this is a verification mismatch rather than a run failure.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, SpecError::Mismatch { .. })
    }
}

impl From<ControlError> for SpecError {
    fn from(err: ControlError) -> Self {
        SpecError::Control(Arc::new(err))
    }
}

/// Result type for specification operations.
pub type Result<T> = std::result::Result<T, SpecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_error_shows_summary_and_description() {
        let err = SpecError::RobotError {
            summary: "X".to_string(),
            description: "Y".to_string(),
        };
        assert_eq!(err.to_string(), "X:Y");
    }

    #[test]
    fn test_mismatch_shows_both_scripts() {
        let err = SpecError::Mismatch {
            expected: "A;B".to_string(),
            observed: "A;C".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("A;B"));
        assert!(msg.contains("A;C"));
        assert!(err.is_mismatch());
    }

    #[test]
    fn test_unreachable_hints_robot_not_running() {
        let source = ControlError::Connect {
            address: "tcp://localhost:11642".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let err = SpecError::unreachable("tcp://localhost:11642", source);
        assert!(err.to_string().contains("Is the robot running?"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_clone_preserves_variant() {
        let err: SpecError = ControlError::protocol("garbled").into();
        let copy = err.clone();
        assert!(matches!(copy, SpecError::Control(_)));
        assert_eq!(copy.to_string(), err.to_string());
    }
}
