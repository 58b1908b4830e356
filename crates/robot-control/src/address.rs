//! Control channel addressing.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the robot listens for control connections by default.
pub const DEFAULT_CONTROL_URI: &str = "tcp://localhost:11642";

/// A parsed `tcp://host:port` control address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlAddress {
    pub host: String,
    pub port: u16,
}

impl ControlAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a control URI. Only the `tcp` scheme is supported.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("tcp://")
            .ok_or_else(|| ControlError::InvalidAddress(format!("{uri} (expected tcp://host:port)")))?;
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ControlError::InvalidAddress(format!("{uri} (missing port)")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ControlError::InvalidAddress(format!("{uri} (missing host)")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ControlError::InvalidAddress(format!("{uri} (bad port {port:?})")))?;

        Ok(Self::new(host, port))
    }

    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ControlAddress {
    fn default() -> Self {
        Self::new("localhost", 11642)
    }
}

impl FromStr for ControlAddress {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_uri() {
        let addr = ControlAddress::parse(DEFAULT_CONTROL_URI).unwrap();
        assert_eq!(addr, ControlAddress::default());
        assert_eq!(addr.socket_addr(), "localhost:11642");
        assert_eq!(addr.to_string(), DEFAULT_CONTROL_URI);
    }

    #[test]
    fn test_parse_ipv6_host() {
        let addr: ControlAddress = "tcp://[::1]:9000".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.socket_addr(), "[::1]:9000");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = ControlAddress::parse("http://localhost:11642").unwrap_err();
        assert!(matches!(err, ControlError::InvalidAddress(_)));
    }

    #[test]
    fn test_parse_rejects_missing_or_bad_port() {
        assert!(ControlAddress::parse("tcp://localhost").is_err());
        assert!(ControlAddress::parse("tcp://localhost:http").is_err());
        assert!(ControlAddress::parse("tcp://:80").is_err());
    }
}
