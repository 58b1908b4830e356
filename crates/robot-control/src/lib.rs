//! Robot Control - control channel client for the verification robot
//!
//! Provides the transport half of a robot run:
//! - `Command` / `Event` messages exchanged with the robot
//! - A text wire codec (`codec`) with incremental, timeout-safe decoding
//! - The `ControlChannel` trait and its TCP implementation (`TcpControl`)
//! - In-memory fakes for exercising protocol logic without a robot
//!
//! The client carries no protocol semantics: it connects, writes one command
//! at a time, and reads one event at a time under a timeout.

pub mod address;
pub mod channel;
pub mod codec;
pub mod error;
pub mod fakes;
pub mod message;
pub mod tcp;

// Re-export key types
pub use address::{ControlAddress, DEFAULT_CONTROL_URI};
pub use channel::ControlChannel;
pub use error::{ControlError, Result};
pub use message::{Command, CommandKind, Event, EventKind};
pub use tcp::TcpControl;

/// Protocol version announced in `PREPARE`.
pub const PROTOCOL_VERSION: &str = "2.0";
