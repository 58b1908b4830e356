//! Text wire codec for the robot control protocol.
//!
//! Every frame is a keyword line, zero or more `key:value` header lines and an
//! empty line. Frames that carry text add a `content-length` header and are
//! followed by exactly that many bytes of UTF-8 body.
//!
//! ```text
//! PREPARE            PREPARED             ERROR
//! version:2.0        content-length:9     summary:bad script
//! name:echo/client                        content-length:11
//!                    connect ...
//!                                         line 3: ...
//! ```
//!
//! Decoding works on a caller-owned byte buffer and never consumes a partial
//! frame, so a read that times out half way through an event loses nothing.
//! Lines may end in `\n` or `\r\n`; encoding always writes `\n`.

use crate::error::{ControlError, Result};
use crate::message::{Command, CommandKind, Event, EventKind};
use crate::PROTOCOL_VERSION;

/// Upper bound on a header block before the peer is considered garbled.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a declared `content-length`.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// One decoded frame, before it is interpreted as a command or event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    keyword: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn headers_named<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Serialize a command into its wire form.
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let mut out = String::new();
    out.push_str(command.kind().as_str());
    out.push('\n');

    if let Command::Prepare { names } = command {
        push_header(&mut out, "version", PROTOCOL_VERSION)?;
        for name in names {
            push_header(&mut out, "name", name)?;
        }
    }

    out.push('\n');
    Ok(out.into_bytes())
}

/// Serialize an event into its wire form.
///
/// The client never sends events; this exists for mock robots in tests and
/// tooling.
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    let mut out = String::new();
    out.push_str(event.kind().as_str());
    out.push('\n');

    let body = match event {
        Event::Prepared { script } | Event::Finished { script } => Some(script.as_str()),
        Event::Error {
            summary,
            description,
        } => {
            push_header(&mut out, "summary", summary)?;
            Some(description.as_str())
        }
        Event::Started => None,
    };

    if let Some(body) = body {
        push_header(&mut out, CONTENT_LENGTH, &body.len().to_string())?;
        out.push('\n');
        out.push_str(body);
    } else {
        out.push('\n');
    }

    Ok(out.into_bytes())
}

fn push_header(out: &mut String, key: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(ControlError::protocol(format!(
            "header {key} must not contain line breaks: {value:?}"
        )));
    }
    out.push_str(key);
    out.push(':');
    out.push_str(value);
    out.push('\n');
    Ok(())
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode one event from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// buffer is left untouched in that case. On success the frame's bytes are
/// drained from `buf`.
pub fn decode_event(buf: &mut Vec<u8>) -> Result<Option<Event>> {
    let Some(frame) = decode_frame(buf)? else {
        return Ok(None);
    };

    let kind = EventKind::from_keyword(&frame.keyword)
        .ok_or_else(|| ControlError::protocol(format!("unknown event: {}", frame.keyword)))?;

    let event = match kind {
        EventKind::Prepared => Event::Prepared { script: frame.body },
        EventKind::Started => Event::Started,
        EventKind::Error => Event::Error {
            summary: frame.header("summary").unwrap_or_default().to_string(),
            description: frame.body,
        },
        EventKind::Finished => Event::Finished { script: frame.body },
    };
    Ok(Some(event))
}

/// Decode one command from the front of `buf`. Same buffering rules as
/// [`decode_event`].
pub fn decode_command(buf: &mut Vec<u8>) -> Result<Option<Command>> {
    let Some(frame) = decode_frame(buf)? else {
        return Ok(None);
    };

    let kind = CommandKind::from_keyword(&frame.keyword)
        .ok_or_else(|| ControlError::protocol(format!("unknown command: {}", frame.keyword)))?;

    let command = match kind {
        CommandKind::Prepare => Command::prepare(frame.headers_named("name")),
        CommandKind::Start => Command::Start,
        CommandKind::Abort => Command::Abort,
    };
    Ok(Some(command))
}

fn decode_frame(buf: &mut Vec<u8>) -> Result<Option<Frame>> {
    let Some((header_end, body_start)) = find_header_end(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(ControlError::protocol(format!(
                "header block exceeds {MAX_HEADER_BYTES} bytes"
            )));
        }
        return Ok(None);
    };
    if header_end > MAX_HEADER_BYTES {
        return Err(ControlError::protocol(format!(
            "header block exceeds {MAX_HEADER_BYTES} bytes"
        )));
    }

    let header = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| ControlError::protocol(format!("header is not UTF-8: {e}")))?;

    let mut lines = header.split('\n').map(|l| l.trim_end_matches('\r'));
    let keyword = lines.next().unwrap_or_default().trim().to_string();
    if keyword.is_empty() {
        return Err(ControlError::protocol("frame without keyword"));
    }

    let mut headers = Vec::new();
    for line in lines {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ControlError::protocol(format!("malformed header line: {line:?}")))?;
        headers.push((key.trim().to_ascii_lowercase(), value.to_string()));
    }

    let content_length = match headers.iter().find(|(k, _)| k == CONTENT_LENGTH) {
        Some((_, v)) => v.trim().parse::<usize>().map_err(|_| {
            ControlError::protocol(format!("invalid content-length: {v:?}"))
        })?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(ControlError::protocol(format!(
            "content-length {content_length} exceeds {MAX_BODY_BYTES} bytes"
        )));
    }

    let frame_end = body_start
        .checked_add(content_length)
        .ok_or_else(|| ControlError::protocol("content-length overflows the frame"))?;
    if buf.len() < frame_end {
        return Ok(None);
    }

    let body = std::str::from_utf8(&buf[body_start..frame_end])
        .map_err(|e| ControlError::protocol(format!("body is not UTF-8: {e}")))?
        .to_string();

    buf.drain(..frame_end);

    Ok(Some(Frame {
        keyword,
        headers,
        body,
    }))
}

/// Locate the blank line ending the header block.
///
/// Returns the length of the header text and the offset where the body
/// starts. Accepts `\n\n` and `\r\n\r\n` (and mixes of the two).
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|&b| b == b'\n') {
        let nl = from + pos;
        let rest = &buf[nl + 1..];
        if rest.starts_with(b"\n") {
            return Some((nl, nl + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((nl, nl + 3));
        }
        from = nl + 1;
    }
    None
}
