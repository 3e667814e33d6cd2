//! STOMP 1.2 frames carried in WebSocket text messages.
//!
//! # Wire format
//!
//! ```text
//! COMMAND EOL
//! (header-name:header-value EOL)*
//! EOL
//! body NUL
//! ```
//!
//! `EOL` is `\n` or `\r\n`. A WebSocket message made only of EOLs is a
//! heartbeat. One message may carry several frames back to back.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{JSON_CONTENT_TYPE, STOMP_ACCEPT_VERSION};

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("frame ended inside the header block")]
    Truncated,

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame is missing its NUL terminator")]
    MissingNul,

    #[error("unexpected data after frame")]
    TrailingData,

    #[error("frame is not valid UTF-8")]
    Utf8,

    #[error("invalid heart-beat header: {0}")]
    InvalidHeartBeat(String),
}

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,

    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Headers of CONNECT and CONNECTED frames are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
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
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Heartbeat intervals in milliseconds, as carried by the `heart-beat` header.
///
/// Zero disables the corresponding direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        outgoing_ms: 0,
        incoming_ms: 0,
    };

    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self {
            outgoing_ms: outgoing.as_millis() as u64,
            incoming_ms: incoming.as_millis() as u64,
        }
    }

    /// Parses an `out,in` header value.
    pub fn parse(value: &str) -> Result<Self, FrameError> {
        let invalid = || FrameError::InvalidHeartBeat(value.to_string());
        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            outgoing_ms: out.trim().parse().map_err(|_| invalid())?,
            incoming_ms: inc.trim().parse().map_err(|_| invalid())?,
        })
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Combines the client's offer with the server's answer.
    ///
    /// Each direction runs at the slower of the two requested rates, and is
    /// disabled when either side asked for zero.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> HeartBeat {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                0
            } else {
                ours.max(theirs)
            }
        };
        HeartBeat {
            outgoing_ms: pick(client.outgoing_ms, server.incoming_ms),
            incoming_ms: pick(client.incoming_ms, server.outgoing_ms),
        }
    }

    pub fn outgoing(&self) -> Option<Duration> {
        (self.outgoing_ms > 0).then(|| Duration::from_millis(self.outgoing_ms))
    }

    pub fn incoming(&self) -> Option<Duration> {
        (self.incoming_ms > 0).then(|| Duration::from_millis(self.incoming_ms))
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order; when a name repeats, the first occurrence
/// is the one [`Frame::header`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
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

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Builds the CONNECT frame that opens a session.
    pub fn connect<I, K, V>(host: &str, heart_beat: HeartBeat, extra_headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut frame = Frame::new(Command::Connect)
            .with_header("accept-version", STOMP_ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.header_value());
        for (k, v) in extra_headers {
            frame = frame.with_header(k, v);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    /// Builds a SEND frame with a JSON body.
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Reads the `heart-beat` header; a missing header disables heartbeats.
    pub fn heart_beat(&self) -> Result<HeartBeat, FrameError> {
        match self.header("heart-beat") {
            Some(v) => HeartBeat::parse(v),
            None => Ok(HeartBeat::DISABLED),
        }
    }

    /// Human-readable reason carried by an ERROR frame.
    pub fn error_message(&self) -> String {
        match self.header("message") {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => self.body.trim().to_string(),
        }
    }

    /// Serialises the frame, NUL terminator included.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
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

    /// Decodes exactly one frame. Leading and trailing EOLs are ignored.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let (frame, rest) = decode_one(text)?;
        if !is_heartbeat(rest) {
            return Err(FrameError::TrailingData);
        }
        Ok(frame)
    }
}

/// Returns `true` when the message carries no frame, only EOLs.
pub fn is_heartbeat(text: &str) -> bool {
    text.bytes().all(|b| b == b'\n' || b == b'\r')
}

/// Decodes every frame in a WebSocket message, in order.
pub fn decode_frames(text: &str) -> Result<Vec<Frame>, FrameError> {
    match decode_frames_partial(text) {
        (frames, None) => Ok(frames),
        (_, Some(e)) => Err(e),
    }
}

/// Decodes frames up to the first malformed one.
///
/// Returns the frames that precede the failure along with the error. Nothing
/// after a bad frame is decoded, since its end cannot be located reliably.
pub fn decode_frames_partial(text: &str) -> (Vec<Frame>, Option<FrameError>) {
    let mut frames = Vec::new();
    let mut rest = text;
    while !is_heartbeat(rest) {
        match decode_one(rest) {
            Ok((frame, next)) => {
                frames.push(frame);
                rest = next;
            }
            Err(e) => return (frames, Some(e)),
        }
    }
    (frames, None)
}

/// Decodes frames from a binary WebSocket message.
pub fn decode_frames_bytes(bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FrameError::Utf8)?;
    decode_frames(text)
}

/// Binary counterpart of [`decode_frames_partial`].
pub fn decode_frames_bytes_partial(bytes: &[u8]) -> (Vec<Frame>, Option<FrameError>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => decode_frames_partial(text),
        Err(_) => (Vec::new(), Some(FrameError::Utf8)),
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str), FrameError> {
    let input = input.trim_start_matches(['\n', '\r']);
    if input.is_empty() {
        return Err(FrameError::Empty);
    }

    let (command_line, mut rest) = split_line(input).ok_or(FrameError::Truncated)?;
    let command: Command = command_line.parse()?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = split_line(rest).ok_or(FrameError::Truncated)?;
        rest = next;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut frame = Frame {
        command,
        headers,
        body: String::new(),
    };

    let content_length = match frame.header("content-length") {
        Some(v) => Some(
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.to_string()))?,
        ),
        None => None,
    };

    let (body, after) = match content_length {
        Some(len) => {
            let body = rest
                .get(..len)
                .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
            let after = rest[len..].strip_prefix('\0').ok_or(FrameError::MissingNul)?;
            (body, after)
        }
        None => {
            let nul = rest.find('\0').ok_or(FrameError::MissingNul)?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };
    frame.body = body.to_string();

    Ok((frame, after))
}

/// Splits off one line, dropping the EOL (`\n` or `\r\n`).
fn split_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = &s[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &s[idx + 1..]))
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(s: &str) -> Result<String, FrameError> {
    if !s.contains('\\') {
        return Ok(s.to_string());
    }
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
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_layout() {
        let frame = Frame::connect(
            "chat.example.org",
            HeartBeat::new(Duration::from_secs(4), Duration::from_secs(4)),
            [("Authorization", "Bearer abc:def")],
        );
        let wire = frame.encode();
        assert!(wire.starts_with("CONNECT\n"));
        assert!(wire.contains("accept-version:1.2,1.1,1.0\n"));
        assert!(wire.contains("heart-beat:4000,4000\n"));
        // CONNECT headers are sent verbatim, colons included.
        assert!(wire.contains("Authorization:Bearer abc:def\n"));
        assert!(wire.ends_with("\n\n\0"));
    }

    #[test]
    fn send_frame_sets_json_headers() {
        let frame = Frame::send("/pub/chat/message", r#"{"a":"ü"}"#);
        assert_eq!(frame.header("destination"), Some("/pub/chat/message"));
        assert_eq!(frame.header("content-type"), Some("application/json"));
        // Byte length, not char count.
        assert_eq!(frame.header("content-length"), Some("11"));
    }

    #[test]
    fn decode_message_frame() {
        let wire = "MESSAGE\ndestination:/sub/chat/room/1_5\nsubscription:sub-0\nmessage-id:7\n\n{\"type\":\"MESSAGE\"}\0";
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.body, "{\"type\":\"MESSAGE\"}");
    }

    #[test]
    fn decode_accepts_crlf_and_trailing_eols() {
        let wire = "RECEIPT\r\nreceipt-id:77\r\n\r\n\0\r\n\n";
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.command, Command::Receipt);
        assert_eq!(frame.header("receipt-id"), Some("77"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn header_escapes_survive_the_wire() {
        let frame = Frame::new(Command::Send)
            .with_header("destination", "/pub/a:b")
            .with_header("note", "line1\nline2\\end");
        let wire = frame.encode();
        assert!(wire.contains("destination:/pub/a\\cb\n"));
        let decoded = Frame::decode(&wire).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn invalid_escape_is_rejected() {
        let wire = "MESSAGE\nbad:va\\tlue\n\n\0";
        assert!(matches!(
            Frame::decode(wire),
            Err(FrameError::InvalidEscape(_))
        ));
    }

    #[test]
    fn repeated_header_first_wins() {
        let wire = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.header("foo"), Some("first"));
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let wire = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn content_length_past_end_is_rejected() {
        let wire = "MESSAGE\ncontent-length:99\n\nabc\0";
        assert!(matches!(
            Frame::decode(wire),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn missing_nul_is_rejected() {
        assert_eq!(
            Frame::decode("MESSAGE\n\nbody"),
            Err(FrameError::MissingNul)
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            Frame::decode("PUBLISH\n\n\0"),
            Err(FrameError::UnknownCommand(c)) if c == "PUBLISH"
        ));
    }

    #[test]
    fn header_without_colon_is_rejected() {
        assert!(matches!(
            Frame::decode("MESSAGE\nnocolon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn truncated_header_block_is_rejected() {
        assert_eq!(
            Frame::decode("MESSAGE\nfoo:bar"),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn several_frames_in_one_message() {
        let text = format!(
            "{}\n{}",
            Frame::new(Command::Receipt).with_header("receipt-id", "1").encode(),
            Frame::new(Command::Message).with_body("x").encode()
        );
        let frames = decode_frames(&text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "x");
    }

    #[test]
    fn partial_decode_keeps_frames_before_a_bad_one() {
        let text = format!(
            "{}\nNOPE\n\n\0{}",
            Frame::new(Command::Message).with_body("{}").encode(),
            Frame::new(Command::Message).with_body("later").encode()
        );

        let (frames, error) = decode_frames_partial(&text);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body, "{}");
        assert_eq!(error, Some(FrameError::UnknownCommand("NOPE".into())));
        assert!(decode_frames(&text).is_err());

        let (frames, error) = decode_frames_bytes_partial(&[0xff, 0xfe]);
        assert!(frames.is_empty());
        assert_eq!(error, Some(FrameError::Utf8));
    }

    #[test]
    fn heartbeat_messages_carry_no_frames() {
        assert!(is_heartbeat("\n"));
        assert!(is_heartbeat("\r\n"));
        assert!(!is_heartbeat("MESSAGE\n\n\0"));
        assert!(decode_frames("\n").unwrap().is_empty());
    }

    #[test]
    fn binary_frames_must_be_utf8() {
        assert_eq!(
            decode_frames_bytes(&[0xff, 0xfe]),
            Err(FrameError::Utf8)
        );
        let frames = decode_frames_bytes(b"MESSAGE\n\nhi\0").unwrap();
        assert_eq!(frames[0].body, "hi");
    }

    #[test]
    fn error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .with_header("message", "Session closed.")
            .with_body("details");
        assert_eq!(frame.error_message(), "Session closed.");

        let frame = Frame::new(Command::Error).with_body("  only body \n");
        assert_eq!(frame.error_message(), "only body");
    }

    #[test]
    fn heartbeat_negotiation() {
        let client = HeartBeat {
            outgoing_ms: 4000,
            incoming_ms: 4000,
        };
        let server = HeartBeat {
            outgoing_ms: 10000,
            incoming_ms: 0,
        };
        let agreed = HeartBeat::negotiate(client, server);
        // Server will not read our beats; we read theirs at the slower rate.
        assert_eq!(agreed.outgoing(), None);
        assert_eq!(agreed.incoming(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn heartbeat_header_parsing() {
        let frame = Frame::new(Command::Connected).with_header("heart-beat", "0, 5000");
        assert_eq!(
            frame.heart_beat().unwrap(),
            HeartBeat {
                outgoing_ms: 0,
                incoming_ms: 5000
            }
        );
        assert_eq!(
            Frame::new(Command::Connected).heart_beat().unwrap(),
            HeartBeat::DISABLED
        );
        assert!(HeartBeat::parse("fast").is_err());
    }
}
