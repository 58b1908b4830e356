//! Robot connection and timing configuration.

use std::time::Duration;

use robot_control::{ControlAddress, DEFAULT_CONTROL_URI};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};

/// Interval at which a waiting runner re-checks for a pending abort.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Consecutive I/O failures tolerated before a run is declared dead.
pub const DEFAULT_IO_ERROR_LIMIT: u32 = 8;

/// Configuration for talking to the robot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Control channel URI (`tcp://host:port`).
    pub control_uri: String,

    /// Per-read timeout; also the abort polling granularity.
    pub read_timeout_ms: u64,

    /// Consecutive non-timeout I/O errors before the run fails.
    /// `None` retries forever.
    pub io_error_limit: Option<u32>,

    /// Optional bound on waiting for `PREPARED` during setup.
    pub prepare_timeout_ms: Option<u64>,

    /// Optional bound on waiting for `FINISHED` during teardown.
    pub finish_timeout_ms: Option<u64>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        RobotConfig {
            control_uri: std::env::var("ROBOT_CONTROL_URI")
                .unwrap_or_else(|_| DEFAULT_CONTROL_URI.to_string()),
            read_timeout_ms: std::env::var("ROBOT_READ_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            io_error_limit: Some(DEFAULT_IO_ERROR_LIMIT),
            prepare_timeout_ms: None,
            finish_timeout_ms: None,
        }
    }
}

impl RobotConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Config for a specific control URI, other settings at their defaults.
    pub fn new(control_uri: &str) -> Self {
        RobotConfig {
            control_uri: control_uri.to_string(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            io_error_limit: Some(DEFAULT_IO_ERROR_LIMIT),
            prepare_timeout_ms: None,
            finish_timeout_ms: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_io_error_limit(mut self, limit: Option<u32>) -> Self {
        self.io_error_limit = limit;
        self
    }

    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_finish_timeout(mut self, timeout: Duration) -> Self {
        self.finish_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn prepare_timeout(&self) -> Option<Duration> {
        self.prepare_timeout_ms.map(Duration::from_millis)
    }

    pub fn finish_timeout(&self) -> Option<Duration> {
        self.finish_timeout_ms.map(Duration::from_millis)
    }

    /// Parse the control address.
    pub fn address(&self) -> Result<ControlAddress> {
        ControlAddress::parse(&self.control_uri).map_err(|e| SpecError::Config(e.to_string()))
    }

    /// Check the configuration before a run is started.
    pub fn validate(&self) -> Result<()> {
        self.address()?;
        if self.read_timeout_ms == 0 {
            return Err(SpecError::Config(
                "read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.io_error_limit == Some(0) {
            return Err(SpecError::Config(
                "io_error_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
