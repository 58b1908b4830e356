//! TCP control channel.

use crate::address::ControlAddress;
use crate::channel::ControlChannel;
use crate::codec;
use crate::error::{ControlError, Result};
use crate::message::{Command, Event};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

const READ_CHUNK: usize = 8 * 1024;

/// Control channel over a TCP connection to the robot.
pub struct TcpControl {
    address: ControlAddress,
    stream: Option<TcpStream>,
    /// Bytes received but not yet decoded into an event.
    read_buf: Vec<u8>,
}

impl TcpControl {
    pub fn new(address: ControlAddress) -> Self {
        Self {
            address,
            stream: None,
            read_buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Build from a `tcp://host:port` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Self::new(ControlAddress::parse(uri)?))
    }

    pub fn address(&self) -> &ControlAddress {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl ControlChannel for TcpControl {
    async fn connect(&mut self) -> Result<()> {
        let target = self.address.socket_addr();
        let stream = TcpStream::connect(&target)
            .await
            .map_err(|source| ControlError::Connect {
                address: self.address.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        debug!(address = %self.address, "control channel connected");
        self.read_buf.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_command(&mut self, command: &Command) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(ControlError::NotConnected)?;
        let bytes = codec::encode_command(command)?;

        stream.write_all(&bytes).await?;
        stream.flush().await?;

        trace!(command = %command.kind(), bytes = bytes.len(), "command written");
        Ok(())
    }

    async fn read_event(&mut self, timeout: Duration) -> Result<Event> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(event) = codec::decode_event(&mut self.read_buf)? {
                trace!(event = %event.kind(), "event read");
                return Ok(event);
            }

            let stream = self.stream.as_mut().ok_or(ControlError::NotConnected)?;
            // `read_buf` is cancel safe: a timed-out read leaves no bytes behind.
            match tokio::time::timeout_at(deadline, stream.read_buf(&mut self.read_buf)).await {
                Err(_) => return Err(ControlError::Timeout(timeout)),
                Ok(Ok(0)) => return Err(ControlError::Closed),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(ControlError::Io(e)),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Best effort: the peer may already be gone.
            let _ = stream.shutdown().await;
            debug!(address = %self.address, "control channel disconnected");
        }
        self.read_buf.clear();
    }

    fn peer(&self) -> String {
        self.address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut control = TcpControl::new(ControlAddress::default());
        let err = control.write_command(&Command::Start).await.unwrap_err();
        assert!(matches!(err, ControlError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let mut control = TcpControl::from_uri("tcp://127.0.0.1:1").unwrap();
        control.disconnect().await;
        control.disconnect().await;
        assert!(!control.is_connected());
    }
}
