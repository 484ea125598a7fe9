//! STOMP 1.2 frame codec.
//!
//! A frame on the wire is:
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! where `^@` is a NUL byte. A WebSocket text message carries one or more
//! frames; bare EOLs between frames are heart-beats. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every command except `CONNECT` and
//! `CONNECTED`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Single-EOL heart-beat as sent on the wire.
pub const HEARTBEAT: &str = "\n";

/// Protocol versions offered in `CONNECT`.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Errors produced while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The command line is not a STOMP command.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// A header line has no `:` separator.
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    /// An escape sequence other than `\\`, `\n`, `\r`, `\c`.
    #[error("invalid escape sequence `\\{0}` in header")]
    InvalidEscape(char),
    /// `content-length` is not a number.
    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),
    /// The frame ended before its header block or NUL terminator.
    #[error("frame truncated: {0}")]
    Truncated(&'static str),
    /// Body is not valid UTF-8.
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,
    /// `heart-beat` header is not `<cx>,<cy>`.
    #[error("invalid heart-beat header `{0}`")]
    InvalidHeartBeat(String),
}

impl From<FrameError> for herald_core::TransportError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command
// ─────────────────────────────────────────────────────────────────────────────

/// STOMP frame command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// `CONNECT`, `STOMP` and `CONNECTED` frames carry unescaped headers.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated keys are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl Frame {
    /// Empty frame with the given command.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builder-style header append.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame for a virtual host with the client's heart-beat offer.
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", heart_beat.to_string())
    }

    /// Auto-ack `SUBSCRIBE` frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `DISCONNECT` frame.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to wire text, NUL terminator included.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            if escape {
                push_escaped(&mut out, key);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in a WebSocket message.
///
/// Heart-beats (bare EOLs) are skipped, so a message that is only a
/// heart-beat decodes to an empty list.
pub fn decode(text: &str) -> Result<Vec<Frame>, FrameError> {
    let bytes = text.as_bytes();
    let mut frames = Vec::new();
    let mut pos = 0;
    loop {
        pos = skip_eols(bytes, pos);
        if pos >= bytes.len() {
            return Ok(frames);
        }
        let (frame, next) = decode_one(bytes, pos)?;
        frames.push(frame);
        pos = next;
    }
}

fn skip_eols(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && matches!(bytes[pos], b'\n' | b'\r') {
        pos += 1;
    }
    pos
}

/// Read one line starting at `pos`, stripping `\n` or `\r\n`.
fn read_line(bytes: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let end = bytes[pos..].iter().position(|&b| b == b'\n')? + pos;
    let line = &bytes[pos..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, end + 1))
}

fn utf8(bytes: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)
}

fn decode_one(bytes: &[u8], start: usize) -> Result<(Frame, usize), FrameError> {
    let (line, mut pos) = read_line(bytes, start).ok_or(FrameError::Truncated("command line"))?;
    let command: Command = utf8(line)?.parse()?;
    let unescape_headers = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = read_line(bytes, pos).ok_or(FrameError::Truncated("header block"))?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let line = utf8(line)?;
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if unescape_headers {
            headers.push((unescape(key)?, unescape(value)?));
        } else {
            headers.push((key.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let body_end = match content_length {
        Some(len) => {
            let end = pos
                .checked_add(len)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            if bytes.get(end) != Some(&0) {
                return Err(FrameError::Truncated("body shorter than content-length"));
            }
            end
        }
        None => {
            bytes[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(FrameError::Truncated("missing NUL terminator"))?
                + pos
        }
    };
    let body = utf8(&bytes[pos..body_end])?.to_string();

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        body_end + 1,
    ))
}

fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::MalformedHeader(raw.to_string())),
        }
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Heart-beating
// ─────────────────────────────────────────────────────────────────────────────

/// A `heart-beat` header value: `outgoing,incoming` in milliseconds.
///
/// `outgoing` is the smallest interval at which the sender can emit
/// heart-beats, `incoming` the interval it would like to receive them at.
/// Zero means "none".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartBeat {
    /// Sender's outgoing interval in ms.
    pub outgoing: u64,
    /// Sender's desired incoming interval in ms.
    pub incoming: u64,
}

impl HeartBeat {
    /// Construct from both intervals.
    pub fn new(outgoing: u64, incoming: u64) -> Self {
        Self { outgoing, incoming }
    }

    /// Parse a `heart-beat` header value.
    pub fn parse(value: &str) -> Result<Self, FrameError> {
        let invalid = || FrameError::InvalidHeartBeat(value.to_string());
        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            outgoing: out.trim().parse().map_err(|_| invalid())?,
            incoming: inc.trim().parse().map_err(|_| invalid())?,
        })
    }

    /// Intervals this client must honor given the broker's `CONNECTED`
    /// header, from the client's point of view.
    ///
    /// Each direction uses the larger of the two offers, or is disabled if
    /// either side offered zero.
    pub fn negotiate(client: Self, server: Self) -> Self {
        fn pick(a: u64, b: u64) -> u64 {
            if a == 0 || b == 0 { 0 } else { a.max(b) }
        }
        Self {
            outgoing: pick(client.outgoing, server.incoming),
            incoming: pick(client.incoming, server.outgoing),
        }
    }

    /// Outgoing interval, `None` when disabled.
    pub fn outgoing_interval(self) -> Option<Duration> {
        (self.outgoing > 0).then(|| Duration::from_millis(self.outgoing))
    }

    /// Incoming interval, `None` when disabled.
    pub fn incoming_interval(self) -> Option<Duration> {
        (self.incoming > 0).then(|| Duration::from_millis(self.incoming))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing, self.incoming)
    }
}
