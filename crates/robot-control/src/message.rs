//! Commands sent to the robot and events received from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbound control commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Ask the robot to load and compose the named scripts, in order.
    Prepare { names: Vec<String> },

    /// Begin verifying traffic against the prepared scripts.
    Start,

    /// Stop the run early; the robot still reports `FINISHED`.
    Abort,
}

impl Command {
    pub fn prepare<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::Prepare {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Prepare { .. } => CommandKind::Prepare,
            Command::Start => CommandKind::Start,
            Command::Abort => CommandKind::Abort,
        }
    }
}

/// Discriminant of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Prepare,
    Start,
    Abort,
}

impl CommandKind {
    /// The frame keyword on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Prepare => "PREPARE",
            CommandKind::Start => "START",
            CommandKind::Abort => "ABORT",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "PREPARE" => Some(CommandKind::Prepare),
            "START" => Some(CommandKind::Start),
            "ABORT" => Some(CommandKind::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound control events.
///
/// `Prepared::script` is the expected behavior composed from the prepared
/// names; `Finished::script` is the behavior actually observed. Both are
/// opaque text; only their equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Prepared { script: String },
    Started,
    Error { summary: String, description: String },
    Finished { script: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Prepared { .. } => EventKind::Prepared,
            Event::Started => EventKind::Started,
            Event::Error { .. } => EventKind::Error,
            Event::Finished { .. } => EventKind::Finished,
        }
    }

    pub fn error(summary: impl Into<String>, description: impl Into<String>) -> Self {
        Event::Error {
            summary: summary.into(),
            description: description.into(),
        }
    }
}

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Prepared,
    Started,
    Error,
    Finished,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Prepared => "PREPARED",
            EventKind::Started => "STARTED",
            EventKind::Error => "ERROR",
            EventKind::Finished => "FINISHED",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "PREPARED" => Some(EventKind::Prepared),
            "STARTED" => Some(EventKind::Started),
            "ERROR" => Some(EventKind::Error),
            "FINISHED" => Some(EventKind::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_keeps_name_order() {
        let cmd = Command::prepare(["b/second", "a/first"]);
        match cmd {
            Command::Prepare { names } => assert_eq!(names, vec!["b/second", "a/first"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_kinds_match_keywords() {
        assert_eq!(Command::Start.kind().as_str(), "START");
        assert_eq!(CommandKind::from_keyword("ABORT"), Some(CommandKind::Abort));
        assert_eq!(Event::error("x", "y").kind(), EventKind::Error);
        assert_eq!(EventKind::from_keyword("NOTIFIED"), None);
    }
}
