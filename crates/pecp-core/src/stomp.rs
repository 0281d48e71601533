//! # STOMP 1.2 Framing
//!
//! The broadcast transport speaks STOMP over WebSocket, one frame per
//! WebSocket message. Both the control plane (server side) and the sync
//! agent (client side) use this codec.
//!
//! Only what the broadcast transport needs is implemented: frame encode and
//! decode, header escaping, `content-length`, and heart-beat EOLs.

use thiserror::Error;

/// Frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client connect (STOMP 1.0 spelling).
    Connect,
    /// Client connect (STOMP 1.2 spelling).
    Stomp,
    /// Server connect acknowledgement.
    Connected,
    /// Client subscription.
    Subscribe,
    /// Client unsubscription.
    Unsubscribe,
    /// Client publish.
    Send,
    /// Server delivery.
    Message,
    /// Server receipt.
    Receipt,
    /// Server error.
    Error,
    /// Client disconnect.
    Disconnect,
}

impl Command {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            _ => return None,
        })
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// Frame decoding failure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StompError {
    /// Unknown or missing command line.
    #[error("unknown STOMP command: {0:?}")]
    UnknownCommand(String),
    /// A header line without a colon.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// An escape sequence not defined by STOMP 1.2.
    #[error("invalid header escape in {0:?}")]
    InvalidEscape(String),
    /// Headers were not valid UTF-8.
    #[error("frame headers are not UTF-8")]
    NotUtf8,
    /// Missing NUL terminator or short body.
    #[error("frame is truncated")]
    Truncated,
}

/// A STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command.
    pub command: Command,
    /// Headers in wire order. The first occurrence of a name wins.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl Frame {
    /// Frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize, adding `content-length` when the body is non-empty.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Parse one frame. Returns `Ok(None)` for a heart-beat (only EOLs).
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, StompError> {
        let start = bytes
            .iter()
            .position(|b| *b != b'\n' && *b != b'\r')
            .unwrap_or(bytes.len());
        let bytes = &bytes[start..];
        if bytes.is_empty() {
            return Ok(None);
        }

        let head_end = find_blank_line(bytes).ok_or(StompError::Truncated)?;
        let head = std::str::from_utf8(&bytes[..head_end.0]).map_err(|_| StompError::NotUtf8)?;
        let rest = &bytes[head_end.1..];

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line)
            .ok_or_else(|| StompError::UnknownCommand(command_line.to_string()))?;

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame_len = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.trim().parse::<usize>().ok());
        let body = match frame_len {
            Some(len) => {
                if rest.len() < len + 1 || rest[len] != 0 {
                    return Err(StompError::Truncated);
                }
                rest[..len].to_vec()
            }
            None => {
                let nul = rest.iter().position(|b| *b == 0).ok_or(StompError::Truncated)?;
                rest[..nul].to_vec()
            }
        };

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

// Returns (end of headers, start of body).
fn find_blank_line(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            if bytes.get(i + 1) == Some(&b'\n') {
                return Some((i, i + 2));
            }
            if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
                return Some((i, i + 3));
            }
        }
        i += 1;
    }
    None
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(StompError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_message_frame() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/bundles/finance")
            .header("subscription", "sub-0")
            .body(b"{}".to_vec());
        let wire = frame.encode();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("MESSAGE\n"));
        assert!(text.contains("destination:/topic/bundles/finance\n"));
        assert!(text.contains("content-length:2\n"));
        assert!(text.ends_with("\n\n{}\0"));
    }

    #[test]
    fn decodes_subscribe_without_body() {
        let wire = b"SUBSCRIBE\nid:sub-0\ndestination:/topic/bundles/finance\n\n\0";
        let frame = Frame::decode(wire).unwrap().unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/topic/bundles/finance"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_honours_content_length_with_embedded_nul() {
        let frame = Frame::new(Command::Send).body(vec![b'a', 0, b'b']);
        let back = Frame::decode(&frame.encode()).unwrap().unwrap();
        assert_eq!(back.body, vec![b'a', 0, b'b']);
    }

    #[test]
    fn heartbeat_decodes_to_none() {
        assert_eq!(Frame::decode(b"\n").unwrap(), None);
        assert_eq!(Frame::decode(b"\r\n\n").unwrap(), None);
    }

    #[test]
    fn header_escaping_round_trips() {
        let frame = Frame::new(Command::Message).header("note", "a:b\nc\\d");
        let wire = String::from_utf8(frame.encode()).unwrap();
        assert!(wire.contains("note:a\\cb\\nc\\\\d\n"));
        let back = Frame::decode(wire.as_bytes()).unwrap().unwrap();
        assert_eq!(back.get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn connect_headers_are_not_unescaped() {
        let wire = b"CONNECT\naccept-version:1.2\nhost:a\\cb\n\n\0";
        let frame = Frame::decode(wire).unwrap().unwrap();
        assert_eq!(frame.get("host"), Some("a\\cb"));
    }

    #[test]
    fn rejects_unknown_command_and_truncation() {
        assert!(matches!(
            Frame::decode(b"BOGUS\n\n\0"),
            Err(StompError::UnknownCommand(_))
        ));
        assert_eq!(
            Frame::decode(b"SEND\ndestination:/x\n\nabc"),
            Err(StompError::Truncated)
        );
        assert_eq!(
            Frame::decode(b"SEND\ncontent-length:10\n\nabc\0"),
            Err(StompError::Truncated)
        );
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let wire = b"SUBSCRIBE\r\nid:0\r\ndestination:/topic/t\r\n\r\n\0";
        let frame = Frame::decode(wire).unwrap().unwrap();
        assert_eq!(frame.get("destination"), Some("/topic/t"));
    }
}
