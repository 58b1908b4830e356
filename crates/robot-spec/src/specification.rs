//! Lifecycle adapter between a test's setup/teardown hooks and a script run.
//!
//! Setup starts a [`ScriptRunner`] and returns once the robot has prepared
//! the scripts, so the test body never races the robot. Teardown lets the
//! robot start (aborting first if the body failed), waits for the outcome and
//! compares expected against observed behavior.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use robot_control::ControlChannel;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RobotConfig;
use crate::error::{Result, SpecError};
use crate::latch::Latch;
use crate::obs;
use crate::runner::{ScriptPair, ScriptRunner};
use crate::scripts::resolve_scripts;

/// What a test declares about its robot scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMetadata {
    /// Test name, used in logs and verdicts.
    pub name: String,

    /// Script identifiers, in the order they are prepared.
    pub scripts: Vec<String>,

    /// Optional root that qualifies plain script names.
    pub script_root: Option<String>,
}

impl TestMetadata {
    pub fn new<I, S>(name: &str, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            scripts: scripts.into_iter().map(Into::into).collect(),
            script_root: None,
        }
    }

    pub fn with_root(mut self, root: &str) -> Self {
        self.script_root = Some(root.to_string());
        self
    }

    /// Script names as sent to the robot.
    pub fn resolved_scripts(&self) -> Vec<String> {
        resolve_scripts(self.script_root.as_deref(), &self.scripts)
    }
}

/// The two-phase hook contract of a host test scheduler.
#[async_trait]
pub trait TestAction: Send {
    /// Runs before the test body; may block until the robot is ready.
    async fn before_test(&mut self) -> Result<()>;

    /// Runs after the test body, unconditionally.
    async fn after_test(&mut self, test_failed: bool) -> Result<ScriptPair>;
}

/// Failure of a whole specification run driven by [`Specification::run`].
#[derive(Debug, thiserror::Error)]
pub enum SpecFailure<E> {
    #[error("setup failed: {0}")]
    Setup(SpecError),

    #[error("test body failed: {0}")]
    Body(E),

    #[error("{0}")]
    Verification(SpecError),
}

/// Robot-verified test: setup/teardown around a test body.
pub struct Specification {
    metadata: TestMetadata,
    config: RobotConfig,
    /// Injected channel for the next run; TCP from `config` otherwise.
    channel: Option<Box<dyn ControlChannel>>,
    latch: Latch,
    runner: Option<ScriptRunner>,
}

impl std::fmt::Debug for Specification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specification")
            .field("metadata", &self.metadata)
            .field("config", &self.config)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl Specification {
    pub fn new(metadata: TestMetadata, config: RobotConfig) -> Self {
        Self {
            metadata,
            config,
            channel: None,
            latch: Latch::new(),
            runner: None,
        }
    }

    /// Use `channel` instead of connecting over TCP for the next run.
    pub fn with_channel<C>(mut self, channel: C) -> Self
    where
        C: ControlChannel + 'static,
    {
        self.channel = Some(Box::new(channel));
        self
    }

    pub fn metadata(&self) -> &TestMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &RobotConfig {
        &self.config
    }

    /// Latch of the current run.
    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    pub fn runner(&self) -> Option<&ScriptRunner> {
        self.runner.as_ref()
    }

    /// Let the robot start before teardown, e.g. once the system under test
    /// is listening.
    pub fn notify_startable(&self) {
        self.latch.notify_startable();
    }

    /// Setup phase: start the run and wait until the robot is prepared.
    pub async fn setup(&mut self) -> Result<()> {
        let scripts = self.metadata.resolved_scripts();
        if scripts.is_empty() {
            return Err(SpecError::NoScripts);
        }

        self.latch = Latch::new();
        let mut runner = match self.channel.take() {
            Some(channel) => {
                self.config.validate()?;
                ScriptRunner::with_channel(channel, scripts, self.latch.clone())
                    .with_read_timeout(self.config.read_timeout())
                    .with_io_error_limit(self.config.io_error_limit)
            }
            None => ScriptRunner::new(&self.config, scripts, self.latch.clone())?,
        };

        info!(test = %self.metadata.name, run_id = %runner.run_id(), "starting robot run");
        runner.start()?;
        let runner = self.runner.insert(runner);

        let prepared = match self.config.prepare_timeout() {
            Some(after) => bounded(after, "prepare", runner.latch().await_prepared()).await,
            None => runner.latch().await_prepared().await,
        };

        if let Err(error) = &prepared {
            // Stop a run that is still waiting on the robot.
            runner.abort();
            runner.latch().notify_exception(error.clone());
            warn!(test = %self.metadata.name, error = %error, "robot did not prepare");
        }
        prepared
    }

    /// Teardown phase: abort if the body failed, wait for the outcome and
    /// compare expected with observed behavior.
    pub async fn teardown(&mut self, test_failed: bool) -> Result<ScriptPair> {
        let mut runner = self.runner.take().ok_or(SpecError::NotSetUp)?;

        if test_failed {
            runner.abort();
        }

        let joined = match self.config.finish_timeout() {
            Some(after) => bounded(after, "finish", runner.join()).await,
            None => runner.join().await,
        };
        if let Err(error) = &joined {
            // A run still polling the robot stops at its next read miss.
            runner.latch().notify_exception(error.clone());
        }
        self.release(&mut runner).await;

        let pair = match joined {
            Ok(pair) => pair,
            Err(error) => {
                warn!(test = %self.metadata.name, error = %error, "robot run failed");
                return Err(error);
            }
        };

        obs::emit_verdict(&self.metadata.name, &pair.expected, &pair.observed);
        pair.verify()
    }

    /// Wait for the runner's task to let go of the control connection.
    async fn release(&mut self, runner: &mut ScriptRunner) {
        let stopped = match self.config.finish_timeout() {
            Some(after) => tokio::time::timeout(after, runner.stopped()).await.is_ok(),
            None => {
                runner.stopped().await;
                true
            }
        };
        if !stopped {
            warn!(test = %self.metadata.name, run_id = %runner.run_id(), "robot run did not stop, cancelling it");
        }
    }

    /// Drive setup, `body` and teardown the way a test scheduler would.
    ///
    /// The body receives the run's latch so it can signal startable early.
    /// Teardown always runs; a body error or panic counts as a failed test,
    /// and a panic is resumed after teardown. A body error takes precedence
    /// over a verification failure.
    pub async fn run<F, Fut, T, E>(&mut self, body: F) -> std::result::Result<T, SpecFailure<E>>
    where
        F: FnOnce(Latch) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Err(error) = self.setup().await {
            // The scheduler still tears down after a failed setup.
            if self.runner.is_some() {
                let _ = self.teardown(true).await;
            }
            return Err(SpecFailure::Setup(error));
        }

        let outcome = AssertUnwindSafe(body(self.latch.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => match self.teardown(false).await {
                Ok(_) => Ok(value),
                Err(error) => Err(SpecFailure::Verification(error)),
            },
            Ok(Err(body_error)) => {
                if let Err(error) = self.teardown(true).await {
                    warn!(test = %self.metadata.name, error = %error, "teardown after failed body");
                }
                Err(SpecFailure::Body(body_error))
            }
            Err(panic) => {
                let _ = self.teardown(true).await;
                std::panic::resume_unwind(panic)
            }
        }
    }
}

async fn bounded<T, F>(after: Duration, phase: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(SpecError::AwaitTimeout { phase, after }),
    }
}

#[async_trait]
impl TestAction for Specification {
    async fn before_test(&mut self) -> Result<()> {
        self.setup().await
    }

    async fn after_test(&mut self, test_failed: bool) -> Result<ScriptPair> {
        self.teardown(test_failed).await
    }
}
