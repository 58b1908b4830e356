//! Robot Spec - robot-verified network specifications for Rust tests
//!
//! Coordinates a test with an external verification robot:
//! - `Latch`: rendezvous between the protocol task and the test
//! - `ScriptRunner`: the PREPARE / START / ABORT control state machine
//! - `Specification`: setup/teardown hooks that wrap a test body and compare
//!   the expected script with what the robot observed
//!
//! ```ignore
//! let meta = TestMetadata::new("echo", ["client"]).with_root("org/example/echo");
//! let mut spec = Specification::new(meta, RobotConfig::from_env());
//! spec.run(|latch| async move {
//!     let server = start_echo_server().await?;
//!     latch.notify_startable();
//!     server.serve_one().await
//! })
//! .await?;
//! ```

pub mod config;
pub mod error;
pub mod latch;
pub mod obs;
pub mod runner;
pub mod scripts;
pub mod specification;
pub mod telemetry;

pub use config::RobotConfig;
pub use error::{Result, SpecError};
pub use latch::Latch;
pub use obs::{
    emit_abort_requested, emit_command_sent, emit_event_received, emit_run_failed,
    emit_run_finished, emit_run_started, emit_verdict, RunSpan,
};
pub use runner::{RunState, ScriptPair, ScriptRunner};
pub use scripts::resolve_scripts;
pub use specification::{SpecFailure, Specification, TestAction, TestMetadata};
pub use telemetry::init_tracing;

pub use robot_control::{Command, ControlChannel, ControlError, Event};

/// Robot spec version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
