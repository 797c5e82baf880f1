//! Minimal STOMP 1.2 framing, enough for a client that subscribes and sends.

use crate::common::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            _ => return None,
        })
    }

    // CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

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

    pub fn connect(host: &str) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn send(destination: &str, json_body: &str) -> Self {
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", json_body.len().to_string())
            .with_body(json_body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// First occurrence wins when a header is repeated.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

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

    /// Parses one frame. Returns `Ok(None)` for a heart-beat (bare EOLs).
    pub fn parse(text: &str) -> Result<Option<Frame>, ChatError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() || text == "\0" {
            return Ok(None);
        }

        let mut head = Vec::new();
        let mut offset = 0;
        let mut body_start = None;
        for line in text.split_inclusive('\n') {
            offset += line.len();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                body_start = Some(offset);
                break;
            }
            head.push(line);
        }
        let body_start = body_start
            .ok_or_else(|| {
                ChatError::MalformedFrame("frame has no header terminator".to_string())
            })?;

        let mut lines = head.into_iter();
        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line).ok_or_else(|| {
            ChatError::MalformedFrame(format!("unknown STOMP command `{command_line}`"))
        })?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ChatError::MalformedFrame(format!("header line without separator: `{line}`"))
            })?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };
        frame.body = read_body(&text[body_start..], frame.header("content-length")).to_string();
        Ok(Some(frame))
    }
}

fn read_body<'a>(rest: &'a str, content_length: Option<&str>) -> &'a str {
    if let Some(length) = content_length.and_then(|value| value.trim().parse::<usize>().ok()) {
        if length <= rest.len() && rest.is_char_boundary(length) {
            return &rest[..length];
        }
    }
    match rest.find('\0') {
        Some(end) => &rest[..end],
        None => rest,
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, ChatError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
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
            other => {
                return Err(ChatError::MalformedFrame(format!(
                    "invalid header escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_frame_encoding() {
        let frame = Frame::send("/app/chat.send", r#"{"content":"hi"}"#);

        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/chat.send\ncontent-type:application/json\ncontent-length:16\n\n{\"content\":\"hi\"}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let encoded = Frame::connect("localhost:8080").encode();

        assert!(encoded.starts_with("CONNECT\naccept-version:1.2\nhost:localhost:8080\n"));
    }

    #[test]
    fn parses_message_frame_with_escaped_header() {
        let text = "MESSAGE\r\nsubscription:sub-0\r\ndestination:/topic/messages/7\r\nnote:a\\cb\\\\c\r\n\r\n{\"content\":\"yo\"}\0\n";

        let frame = Frame::parse(text).unwrap().unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.header("subscription"), Some("sub-0"));
        assert_eq!(frame.header("note"), Some("a:b\\c"));
        assert_eq!(frame.body, "{\"content\":\"yo\"}");
    }

    #[test]
    fn content_length_bounds_the_body() {
        let text = "MESSAGE\ncontent-length:3\n\nabc\0def\0";

        let frame = Frame::parse(text).unwrap().unwrap();

        assert_eq!(frame.body, "abc");
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let frame = Frame::parse("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap().unwrap();

        assert_eq!(frame.header("foo"), Some("1"));
    }

    #[test]
    fn heartbeat_is_not_a_frame() {
        assert_eq!(Frame::parse("\n").unwrap(), None);
        assert_eq!(Frame::parse("\r\n\r\n").unwrap(), None);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(Frame::parse("HELLO\n\n\0").is_err());
        assert!(Frame::parse("MESSAGE\nno-separator\n\n\0").is_err());
        assert!(Frame::parse("MESSAGE\nbad:\\t\n\n\0").is_err());
        assert!(Frame::parse("MESSAGE\ndestination:/x").is_err());
    }
}
