//! The control channel abstraction.

use crate::error::Result;
use crate::message::{Command, Event};
use async_trait::async_trait;
use std::time::Duration;

/// A point-to-point control connection to the robot.
///
/// Implementations are pure transport: one command written at a time, one
/// event read at a time, delivered in order. They are owned by a single task
/// and never shared.
#[async_trait]
pub trait ControlChannel: Send {
    /// Establish the connection. Fails with `ControlError::Connect` when the
    /// robot is unreachable.
    async fn connect(&mut self) -> Result<()>;

    /// Serialize and send one command.
    async fn write_command(&mut self, command: &Command) -> Result<()>;

    /// Wait up to `timeout` for one complete event.
    ///
    /// A timeout yields `ControlError::Timeout` and leaves any partially
    /// received frame buffered for the next call.
    async fn read_event(&mut self, timeout: Duration) -> Result<Event>;

    /// Release the connection. Idempotent and infallible.
    async fn disconnect(&mut self);

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}

#[async_trait]
impl<C: ControlChannel + ?Sized> ControlChannel for Box<C> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn write_command(&mut self, command: &Command) -> Result<()> {
        (**self).write_command(command).await
    }

    async fn read_event(&mut self, timeout: Duration) -> Result<Event> {
        (**self).read_event(timeout).await
    }

    async fn disconnect(&mut self) {
        (**self).disconnect().await
    }

    fn peer(&self) -> String {
        (**self).peer()
    }
}
