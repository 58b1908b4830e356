//! Rendezvous latch between a script runner and the test that owns it.
//!
//! Three one-shot gates (`prepared`, `startable`, `finished`), a sticky
//! abort flag and a sticky terminal exception, all published through a single
//! `watch` channel. Gates only ever open. Once an exception is stored every
//! current and future wait returns it, even for gates that are already open.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Result, SpecError};

#[derive(Debug, Clone, Default)]
struct LatchState {
    prepared: bool,
    startable: bool,
    finished: bool,
    abort_requested: bool,
    exception: Option<SpecError>,
}

/// Cloneable handle to a shared rendezvous latch.
#[derive(Debug, Clone)]
pub struct Latch {
    state: Arc<watch::Sender<LatchState>>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LatchState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Runner: the robot confirmed the scripts are prepared.
    pub fn notify_prepared(&self) {
        self.open("prepared", |s| &mut s.prepared);
    }

    /// Owner: block until the robot is prepared.
    pub async fn await_prepared(&self) -> Result<()> {
        self.wait(|s| s.prepared).await
    }

    /// Owner: the system under test is ready; the robot may start.
    pub fn notify_startable(&self) {
        self.open("startable", |s| &mut s.startable);
    }

    /// Runner: block until the owner allows the run to start.
    pub async fn await_startable(&self) -> Result<()> {
        self.wait(|s| s.startable).await
    }

    /// Runner: the run is over and its script pair is published.
    pub fn notify_finished(&self) {
        self.open("finished", |s| &mut s.finished);
    }

    /// Owner: block until the run is over.
    pub async fn await_finished(&self) -> Result<()> {
        self.wait(|s| s.finished).await
    }

    /// Owner: request early termination. Polled by the runner, never awaited.
    pub fn notify_abort(&self) {
        self.open("abort", |s| &mut s.abort_requested);
    }

    /// Store the terminal exception and release every waiter.
    ///
    /// Only the first exception is kept; returns whether this call stored it.
    pub fn notify_exception(&self, error: SpecError) -> bool {
        let stored = self.state.send_if_modified(move |s| {
            if s.exception.is_some() {
                false
            } else {
                s.exception = Some(error);
                true
            }
        });
        if stored {
            debug!(latch = "exception", "latch gate opened");
        }
        stored
    }

    pub fn is_abort_requested(&self) -> bool {
        self.state.borrow().abort_requested
    }

    pub fn is_prepared(&self) -> bool {
        self.state.borrow().prepared
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// The terminal exception, if one was reported.
    pub fn exception(&self) -> Option<SpecError> {
        self.state.borrow().exception.clone()
    }

    fn open(&self, gate: &'static str, flag: fn(&mut LatchState) -> &mut bool) {
        let opened = self.state.send_if_modified(|s| {
            let flag = flag(s);
            if *flag {
                false
            } else {
                *flag = true;
                true
            }
        });
        if opened {
            debug!(latch = gate, "latch gate opened");
        }
    }

    async fn wait(&self, gate: fn(&LatchState) -> bool) -> Result<()> {
        let mut rx = self.state.subscribe();
        let exception = {
            let state = rx
                .wait_for(|s| s.exception.is_some() || gate(s))
                .await
                .map_err(|_| SpecError::RunnerPanicked("latch closed".to_string()))?;
            state.exception.clone()
        };

        match exception {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
