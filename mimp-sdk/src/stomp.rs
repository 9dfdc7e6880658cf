//! STOMP 1.2 frame encoding and decoding.
//!
//! Frames travel as WebSocket text messages. A single message may carry
//! several NUL-terminated frames, and a bare EOL is a heart-beat.

use std::fmt;
use std::time::Duration;

/// Protocol versions offered in the CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.1,1.2";

/// A STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(cmd)
    }

    /// CONNECT and CONNECTED headers are sent without escaping.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header {0:?}")]
    InvalidEscape(String),
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("frame is missing its NUL terminator")]
    Unterminated,
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Lookups return the first occurrence.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`, per the STOMP repeated-header rule.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Build the CONNECT frame sent at the start of every session.
    pub fn connect(host: &str, heartbeat: Heartbeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", heartbeat.to_header())
            .header("host", host)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Serialize to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
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

/// Either a frame or a heart-beat EOL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Heartbeat,
    Frame(Frame),
}

/// Decode every frame (and heart-beat) contained in one text message.
pub fn decode(text: &str) -> Result<Vec<Incoming>, StompError> {
    let mut out = Vec::new();
    let mut rest = text;

    loop {
        // Leading EOLs are heart-beats.
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        let eols = rest[..rest.len() - trimmed.len()].matches('\n').count();
        out.extend(std::iter::repeat_n(Incoming::Heartbeat, eols));
        rest = trimmed;

        if rest.is_empty() {
            break;
        }
        let (frame, remaining) = decode_one(rest)?;
        out.push(Incoming::Frame(frame));
        rest = remaining;
    }

    if out.is_empty() {
        return Err(StompError::Empty);
    }
    Ok(out)
}

fn decode_one(text: &str) -> Result<(Frame, &str), StompError> {
    let (command_line, mut rest) = split_line(text).ok_or(StompError::Unterminated)?;
    let command =
        Command::parse(command_line).ok_or_else(|| StompError::UnknownCommand(command_line.to_string()))?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest).ok_or(StompError::Unterminated)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| StompError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let (body, remaining) = match content_length {
        Some(len) => {
            if rest.len() <= len || rest.as_bytes()[len] != 0 || !rest.is_char_boundary(len) {
                return Err(StompError::Unterminated);
            }
            (&rest[..len], &rest[len + 1..])
        }
        None => {
            let nul = rest.find('\0').ok_or(StompError::Unterminated)?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, remaining))
}

/// Split off one line, accepting either LF or CRLF.
fn split_line(text: &str) -> Option<(&str, &str)> {
    let idx = text.find('\n')?;
    let line = text[..idx].strip_suffix('\r').unwrap_or(&text[..idx]);
    Some((line, &text[idx + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals. A zero duration means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl Heartbeat {
    pub const DISABLED: Heartbeat = Heartbeat {
        outgoing: Duration::ZERO,
        incoming: Duration::ZERO,
    };

    pub fn to_header(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }

    /// Parse a `heart-beat:sx,sy` header value.
    pub fn parse(value: &str) -> Option<Self> {
        let (a, b) = value.split_once(',')?;
        let a: u64 = a.trim().parse().ok()?;
        let b: u64 = b.trim().parse().ok()?;
        Some(Heartbeat {
            outgoing: Duration::from_millis(a),
            incoming: Duration::from_millis(b),
        })
    }

    /// Combine our requested intervals with the server's CONNECTED header.
    ///
    /// We send every `max(ours.outgoing, server.incoming)` and expect data every
    /// `max(ours.incoming, server.outgoing)`; either side saying 0 disables it.
    pub fn negotiate(&self, server: Heartbeat) -> Heartbeat {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                Duration::ZERO
            } else {
                ours.max(theirs)
            }
        };
        Heartbeat {
            outgoing: pick(self.outgoing, server.incoming),
            incoming: pick(self.incoming, server.outgoing),
        }
    }
}

/// The heart-beat EOL frame.
pub const HEARTBEAT_EOL: &str = "\n";
