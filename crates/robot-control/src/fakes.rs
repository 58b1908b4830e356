//! In-memory control channel (testing only)
//!
//! `ScriptedControl` satisfies the `ControlChannel` contract without a robot.
//! Replies are queued up front, queued in reaction to a written command, or
//! pushed from another task through a [`ScriptedHandle`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::channel::ControlChannel;
use crate::error::{ControlError, Result};
use crate::message::{Command, CommandKind, Event};

/// One scripted outcome of `read_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Event(Event),
    /// Fail the read with an I/O error of this kind.
    IoError(io::ErrorKind),
    /// Fail the read with a timeout without waiting.
    Timeout,
    /// Fail the read with a protocol error.
    Garbled(String),
}

impl From<Event> for Reply {
    fn from(event: Event) -> Self {
        Reply::Event(event)
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    connect_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    connected: bool,
    connects: usize,
    disconnects: usize,
    replies: VecDeque<Reply>,
    reactions: HashMap<CommandKind, Vec<Reply>>,
    commands: Vec<Command>,
}

/// Scripted in-memory control channel.
#[derive(Debug, Default)]
pub struct ScriptedControl {
    state: Arc<Mutex<ScriptedState>>,
    arrived: Arc<Notify>,
}

/// Shared view of a [`ScriptedControl`] that stays usable after the channel
/// has been moved into a runner.
#[derive(Debug, Clone)]
pub struct ScriptedHandle {
    state: Arc<Mutex<ScriptedState>>,
    arrived: Arc<Notify>,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ScriptedHandle {
        ScriptedHandle {
            state: Arc::clone(&self.state),
            arrived: Arc::clone(&self.arrived),
        }
    }

    /// Make `connect` fail with this error kind.
    pub fn refuse_connect(self, kind: io::ErrorKind) -> Self {
        self.lock().connect_error = Some(kind);
        self
    }

    /// Make every `write_command` fail with this error kind.
    pub fn fail_writes(self, kind: io::ErrorKind) -> Self {
        self.lock().write_error = Some(kind);
        self
    }

    /// Queue a reply that is available immediately after connecting.
    pub fn reply(self, reply: impl Into<Reply>) -> Self {
        self.lock().replies.push_back(reply.into());
        self
    }

    /// Queue replies each time a command of `kind` is written.
    pub fn on_command<I, R>(self, kind: CommandKind, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Reply>,
    {
        self.lock()
            .reactions
            .entry(kind)
            .or_default()
            .extend(replies.into_iter().map(Into::into));
        self
    }

    /// A robot that prepares `expected` and finishes with `observed` once started.
    pub fn robot(expected: &str, observed: &str) -> Self {
        Self::new()
            .on_command(
                CommandKind::Prepare,
                [Event::Prepared {
                    script: expected.to_string(),
                }],
            )
            .on_command(
                CommandKind::Start,
                [
                    Event::Started,
                    Event::Finished {
                        script: observed.to_string(),
                    },
                ],
            )
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        lock(&self.state)
    }
}

impl ScriptedHandle {
    /// Commands written so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).commands.clone()
    }

    /// How many commands of `kind` were written.
    pub fn count(&self, kind: CommandKind) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Deliver a reply to the reader, waking it if blocked.
    pub fn push(&self, reply: impl Into<Reply>) {
        lock(&self.state).replies.push_back(reply.into());
        self.arrived.notify_one();
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Wait until a command of `kind` has been written.
    pub async fn wait_for_command(&self, kind: CommandKind) {
        while self.count(kind) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn lock(state: &Mutex<ScriptedState>) -> MutexGuard<'_, ScriptedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ControlChannel for ScriptedControl {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connects += 1;
        if let Some(kind) = state.connect_error {
            return Err(ControlError::Connect {
                address: "scripted".to_string(),
                source: io::Error::from(kind),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn write_command(&mut self, command: &Command) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(ControlError::NotConnected);
        }
        if let Some(kind) = state.write_error {
            return Err(ControlError::Io(io::Error::from(kind)));
        }

        state.commands.push(command.clone());
        if let Some(replies) = state.reactions.get(&command.kind()).cloned() {
            state.replies.extend(replies);
            drop(state);
            self.arrived.notify_one();
        }
        Ok(())
    }

    async fn read_event(&mut self, timeout: Duration) -> Result<Event> {
        let reply = self.lock().replies.pop_front();
        let reply = match reply {
            Some(reply) => reply,
            None => {
                // Nothing queued: block like a socket until a push or the timeout.
                let _ = tokio::time::timeout(timeout, self.arrived.notified()).await;
                let queued = self.lock().replies.pop_front();
                match queued {
                    Some(reply) => reply,
                    None => return Err(ControlError::Timeout(timeout)),
                }
            }
        };

        match reply {
            Reply::Event(event) => Ok(event),
            Reply::IoError(kind) => Err(ControlError::Io(io::Error::from(kind))),
            Reply::Timeout => Err(ControlError::Timeout(timeout)),
            Reply::Garbled(detail) => Err(ControlError::Protocol(detail)),
        }
    }

    async fn disconnect(&mut self) {
        let mut state = self.lock();
        if state.connected {
            state.connected = false;
        }
        state.disconnects += 1;
    }

    fn peer(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reactions_follow_commands() {
        let mut control = ScriptedControl::robot("A;B", "A;B");
        let handle = control.handle();

        control.connect().await.unwrap();
        control
            .write_command(&Command::prepare(["a"]))
            .await
            .unwrap();
        assert_eq!(
            control.read_event(Duration::from_millis(10)).await.unwrap(),
            Event::Prepared {
                script: "A;B".to_string()
            }
        );

        let err = control.read_event(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.is_timeout());

        control.write_command(&Command::Start).await.unwrap();
        assert_eq!(
            control.read_event(Duration::from_millis(10)).await.unwrap(),
            Event::Started
        );
        assert_eq!(handle.count(CommandKind::Start), 1);
    }

    #[tokio::test]
    async fn test_push_wakes_blocked_reader() {
        let mut control = ScriptedControl::new();
        let handle = control.handle();
        control.connect().await.unwrap();

        let pusher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.push(Event::Started);
        });

        let event = control.read_event(Duration::from_secs(5)).await.unwrap();
        assert_eq!(event, Event::Started);
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connect() {
        let mut control = ScriptedControl::new().refuse_connect(io::ErrorKind::ConnectionRefused);
        let err = control.connect().await.unwrap_err();
        assert!(matches!(err, ControlError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_is_counted_and_idempotent() {
        let mut control = ScriptedControl::new();
        let handle = control.handle();
        control.disconnect().await;
        control.connect().await.unwrap();
        control.disconnect().await;
        assert!(!handle.is_connected());
        assert_eq!(handle.disconnects(), 2);
    }
}
