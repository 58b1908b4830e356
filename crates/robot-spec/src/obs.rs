//! Structured observability hooks for robot run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for protocol traffic, aborts and verdicts
//!
//! Set `RUST_LOG=robot_spec=debug` to see individual commands and events.

use robot_control::{CommandKind, EventKind};
use tracing::{debug, error, info, warn};

/// RAII guard that enters a run-scoped tracing span.
///
/// Only for synchronous sections; async code should use [`run_span`] with
/// `tracing::Instrument`.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The span every record of one run is attached to.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("robot.run", run_id = %run_id)
}

/// Emit event: run started for the given scripts.
pub fn emit_run_started(run_id: &str, scripts: &[String], peer: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        scripts = ?scripts,
        peer = %peer,
    );
}

/// Emit event: a command was written to the robot.
pub fn emit_command_sent(kind: CommandKind) {
    debug!(event = "control.command_sent", command = %kind);
}

/// Emit event: an event was read from the robot.
pub fn emit_event_received(kind: EventKind) {
    debug!(event = "control.event_received", kind = %kind);
}

/// Emit event: the owner asked for the run to be aborted.
pub fn emit_abort_requested(run_id: &str) {
    info!(event = "run.abort_requested", run_id = %run_id);
}

/// Emit event: run finished with a published script pair.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, aborted: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        aborted = aborted,
    );
}

/// Emit event: run failed (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

/// Emit event: teardown verdict. Mismatches are logged with both scripts.
pub fn emit_verdict(test_name: &str, expected: &str, observed: &str) {
    if expected == observed {
        info!(event = "spec.verdict", test = %test_name, matched = true);
    } else {
        error!(
            event = "spec.verdict",
            test = %test_name,
            matched = false,
            expected = %expected,
            observed = %observed,
            "robot behavior did not match expected",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
    }
}
