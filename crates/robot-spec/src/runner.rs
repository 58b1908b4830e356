//! Script runner: the robot control protocol state machine.
//!
//! A runner owns one control channel and drives it on a dedicated tokio task:
//!
//! ```text
//! Connecting --PREPARE--> AwaitingPrepared --PREPARED--> AwaitingStartable
//!     --START|ABORT--> Running --FINISHED--> Finished
//! ```
//!
//! Any fatal condition moves the run to `Failed` and is reported through the
//! latch's terminal exception. The owner only ever talks to the runner through
//! the [`Latch`]; `abort` sets a flag the protocol loop polls after every read
//! miss and once more before starting. A terminal exception stored by the
//! owner also stops the loop at its next read miss.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use robot_control::{Command, ControlChannel, ControlError, Event, TcpControl};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::config::{RobotConfig, DEFAULT_IO_ERROR_LIMIT, DEFAULT_READ_TIMEOUT_MS};
use crate::error::{Result, SpecError};
use crate::latch::Latch;
use crate::obs;

/// Expected and observed scripts of one finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPair {
    /// What the prepared scripts say should happen.
    pub expected: String,

    /// What the robot actually observed.
    pub observed: String,
}

impl ScriptPair {
    pub fn new(expected: impl Into<String>, observed: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            observed: observed.into(),
        }
    }

    /// Whether the observed behavior is byte-identical to the expected one.
    pub fn matches(&self) -> bool {
        self.expected == self.observed
    }

    /// Turn a mismatch into `SpecError::Mismatch`.
    pub fn verify(self) -> Result<ScriptPair> {
        if self.matches() {
            Ok(self)
        } else {
            Err(SpecError::Mismatch {
                expected: self.expected,
                observed: self.observed,
            })
        }
    }
}

/// Lifecycle of a single-use runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Connecting,
    AwaitingPrepared,
    AwaitingStartable,
    Running,
    Finished,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "created",
            RunState::Connecting => "connecting",
            RunState::AwaitingPrepared => "awaiting_prepared",
            RunState::AwaitingStartable => "awaiting_startable",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Runs the declared scripts against the robot for one test.
pub struct ScriptRunner {
    run_id: String,
    names: Vec<String>,
    latch: Latch,
    read_timeout: Duration,
    io_error_limit: Option<u32>,
    /// Taken by `start`.
    channel: Mutex<Option<Box<dyn ControlChannel>>>,
    state: Arc<watch::Sender<RunState>>,
    pair: Arc<OnceLock<ScriptPair>>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("run_id", &self.run_id)
            .field("names", &self.names)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ScriptRunner {
    /// Runner talking TCP to the robot described by `config`.
    pub fn new(config: &RobotConfig, names: Vec<String>, latch: Latch) -> Result<Self> {
        config.validate()?;
        let channel = TcpControl::new(config.address()?);
        Ok(Self::with_channel(channel, names, latch)
            .with_read_timeout(config.read_timeout())
            .with_io_error_limit(config.io_error_limit))
    }

    /// Runner over an arbitrary control channel.
    pub fn with_channel<C>(channel: C, names: Vec<String>, latch: Latch) -> Self
    where
        C: ControlChannel + 'static,
    {
        let (state, _) = watch::channel(RunState::Created);
        Self {
            run_id: Uuid::new_v4().to_string(),
            names,
            latch,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            io_error_limit: Some(DEFAULT_IO_ERROR_LIMIT),
            channel: Mutex::new(Some(Box::new(channel))),
            state: Arc::new(state),
            pair: Arc::new(OnceLock::new()),
            task: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_io_error_limit(mut self, limit: Option<u32>) -> Self {
        self.io_error_limit = limit;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// The published result, once the run has finished.
    pub fn script_pair(&self) -> Option<ScriptPair> {
        self.pair.get().cloned()
    }

    /// Begin the run on a background task. Must be called within a tokio
    /// runtime; a runner can only be started once.
    pub fn start(&mut self) -> Result<()> {
        let channel = self
            .channel
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SpecError::AlreadyStarted)?;

        let protocol = Protocol {
            run_id: self.run_id.clone(),
            names: self.names.clone(),
            latch: self.latch.clone(),
            read_timeout: self.read_timeout,
            io_error_limit: self.io_error_limit,
            channel,
            state: Arc::clone(&self.state),
            pair: Arc::clone(&self.pair),
            abort_sent: false,
            io_errors: 0,
        };

        let span = obs::run_span(&self.run_id);
        self.task = Some(tokio::spawn(protocol.drive().instrument(span)));
        Ok(())
    }

    /// Request early termination. Cooperative: the protocol loop sends
    /// `ABORT` at most once, at its next decision point.
    pub fn abort(&self) {
        obs::emit_abort_requested(&self.run_id);
        self.latch.notify_abort();
    }

    /// Allow the robot to start, then wait for the run to complete.
    pub async fn join(&self) -> Result<ScriptPair> {
        self.latch.notify_startable();
        self.latch.await_finished().await?;
        self.script_pair()
            .ok_or_else(|| SpecError::RunnerPanicked("finished without a script pair".to_string()))
    }

    /// Whether the background task has exited.
    pub fn is_done(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(false)
    }

    /// Wait for the background task to exit, after which the control
    /// channel has been released. Returns at once if never started.
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                debug!(run_id = %self.run_id, error = %err, "protocol task did not complete");
            }
        }
    }
}

impl Drop for ScriptRunner {
    fn drop(&mut self) {
        // A run nobody will join again must not keep polling the robot.
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!(run_id = %self.run_id, "dropping unfinished run");
                task.abort();
            }
        }
    }
}

/// State owned by the background protocol task.
struct Protocol {
    run_id: String,
    names: Vec<String>,
    latch: Latch,
    read_timeout: Duration,
    io_error_limit: Option<u32>,
    channel: Box<dyn ControlChannel>,
    state: Arc<watch::Sender<RunState>>,
    pair: Arc<OnceLock<ScriptPair>>,
    abort_sent: bool,
    /// Consecutive non-timeout read failures. A delivered event or a plain
    /// timeout resets the count.
    io_errors: u32,
}

impl Protocol {
    async fn drive(mut self) {
        let started = Instant::now();
        obs::emit_run_started(&self.run_id, &self.names, &self.channel.peer());

        let outcome = AssertUnwindSafe(self.exchange()).catch_unwind().await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => Err(SpecError::RunnerPanicked(panic_message(panic.as_ref()))),
        };

        // Release the connection before anyone waiting on the latch resumes.
        self.channel.disconnect().await;

        match outcome {
            Ok(pair) => {
                let _ = self.pair.set(pair);
                self.transition(RunState::Finished);
                obs::emit_run_finished(
                    &self.run_id,
                    started.elapsed().as_millis() as u64,
                    self.abort_sent,
                );
                self.latch.notify_finished();
            }
            Err(error) => {
                self.transition(RunState::Failed);
                obs::emit_run_failed(&self.run_id, &error);
                self.latch.notify_exception(error);
            }
        }
    }

    async fn exchange(&mut self) -> Result<ScriptPair> {
        self.transition(RunState::Connecting);
        if let Err(source) = self.channel.connect().await {
            return Err(SpecError::unreachable(self.channel.peer(), source));
        }

        self.send(Command::prepare(self.names.clone())).await?;
        self.transition(RunState::AwaitingPrepared);

        let expected = loop {
            let Some(event) = self.next_event().await? else {
                continue;
            };
            match event {
                Event::Prepared { script } => break script,
                Event::Error {
                    summary,
                    description,
                } => return Err(SpecError::RobotError {
                    summary,
                    description,
                }),
                Event::Finished { .. } if self.abort_sent => {
                    return Err(SpecError::AbortedBeforePrepared)
                }
                other => return Err(SpecError::UnsupportedEvent(other.kind())),
            }
        };

        self.latch.notify_prepared();
        self.transition(RunState::AwaitingStartable);
        self.latch.await_startable().await?;

        if self.latch.is_abort_requested() {
            if !self.abort_sent {
                self.send_abort().await?;
            }
        } else {
            self.send(Command::Start).await?;
        }
        self.transition(RunState::Running);

        loop {
            let Some(event) = self.next_event().await? else {
                continue;
            };
            match event {
                Event::Started => {}
                Event::Finished { script } => return Ok(ScriptPair::new(expected, script)),
                Event::Error {
                    summary,
                    description,
                } => return Err(SpecError::RobotError {
                    summary,
                    description,
                }),
                other => return Err(SpecError::UnsupportedEvent(other.kind())),
            }
        }
    }

    /// Read one event. `Ok(None)` is a read miss (timeout or transient I/O
    /// failure) after which a pending abort has been flushed.
    async fn next_event(&mut self) -> Result<Option<Event>> {
        match self.channel.read_event(self.read_timeout).await {
            Ok(event) => {
                self.io_errors = 0;
                obs::emit_event_received(event.kind());
                Ok(Some(event))
            }
            Err(err) if err.is_retryable() => {
                let transient = !err.is_timeout();
                if transient {
                    self.record_io_error(err)?;
                } else {
                    self.io_errors = 0;
                }
                if self.latch.is_abort_requested() && !self.abort_sent {
                    self.send_abort().await?;
                }
                // The owner gave up on this run; stop polling the robot.
                if let Some(error) = self.latch.exception() {
                    return Err(error);
                }
                if transient {
                    // A failed read returns at once; pace retries like a timeout.
                    tokio::time::sleep(self.read_timeout).await;
                }
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_io_error(&mut self, err: ControlError) -> Result<()> {
        self.io_errors += 1;
        if let Some(limit) = self.io_error_limit {
            if self.io_errors >= limit {
                return Err(err.into());
            }
        }
        debug!(error = %err, consecutive = self.io_errors, "control read failed, retrying");
        Ok(())
    }

    async fn send_abort(&mut self) -> Result<()> {
        self.abort_sent = true;
        self.send(Command::Abort).await
    }

    async fn send(&mut self, command: Command) -> Result<()> {
        self.channel.write_command(&command).await?;
        obs::emit_command_sent(command.kind());
        Ok(())
    }

    fn transition(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "run state");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
