use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::header;

/// Header mapping. Order carries no meaning; the first occurrence on the wire wins.
pub type Headers = BTreeMap<String, String>;

/// The command of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
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

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Connect => "CONNECT",
            FrameKind::Connected => "CONNECTED",
            FrameKind::Send => "SEND",
            FrameKind::Subscribe => "SUBSCRIBE",
            FrameKind::Unsubscribe => "UNSUBSCRIBE",
            FrameKind::Message => "MESSAGE",
            FrameKind::Receipt => "RECEIPT",
            FrameKind::Error => "ERROR",
            FrameKind::Disconnect => "DISCONNECT",
        }
    }

    /// Parse a command line. `STOMP` is accepted as an alias of `CONNECT`.
    pub fn parse(command: &str) -> Option<Self> {
        Some(match command {
            "CONNECT" | "STOMP" => FrameKind::Connect,
            "CONNECTED" => FrameKind::Connected,
            "SEND" => FrameKind::Send,
            "SUBSCRIBE" => FrameKind::Subscribe,
            "UNSUBSCRIBE" => FrameKind::Unsubscribe,
            "MESSAGE" => FrameKind::Message,
            "RECEIPT" => FrameKind::Receipt,
            "ERROR" => FrameKind::Error,
            "DISCONNECT" => FrameKind::Disconnect,
            _ => return None,
        })
    }

    /// Headers a frame of this kind must carry.
    pub fn required_headers(self) -> &'static [&'static str] {
        match self {
            FrameKind::Send => &[header::DESTINATION],
            FrameKind::Subscribe => &[header::DESTINATION, header::ID],
            FrameKind::Unsubscribe => &[header::ID],
            FrameKind::Message => &[header::DESTINATION, header::SUBSCRIPTION],
            FrameKind::Receipt => &[header::RECEIPT_ID],
            FrameKind::Connect
            | FrameKind::Connected
            | FrameKind::Error
            | FrameKind::Disconnect => &[],
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    pub fn escapes_headers(self) -> bool {
        !matches!(self, FrameKind::Connect | FrameKind::Connected)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub headers: Headers,
    /// Empty when the frame has no body.
    pub body: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// SUBSCRIBE to `destination` under subscription `id`.
    pub fn subscribe(destination: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(FrameKind::Subscribe)
            .with_header(header::DESTINATION, destination)
            .with_header(header::ID, id)
    }

    /// UNSUBSCRIBE subscription `id`.
    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::new(FrameKind::Unsubscribe).with_header(header::ID, id)
    }

    /// SEND `body` to `destination`.
    pub fn send(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Send)
            .with_header(header::DESTINATION, destination)
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(FrameKind::Disconnect)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn destination(&self) -> Option<&str> {
        self.header(header::DESTINATION)
    }

    pub fn subscription(&self) -> Option<&str> {
        self.header(header::SUBSCRIPTION)
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Check that this frame can be encoded and decoded back unchanged.
    pub fn validate(&self) -> Result<()> {
        for &required in self.kind.required_headers() {
            if !self.headers.contains_key(required) {
                return Err(FrameError::MissingHeader {
                    kind: self.kind,
                    header: required,
                });
            }
        }
        for (name, value) in &self.headers {
            if name.is_empty() {
                return Err(FrameError::MalformedHeader("empty header name".to_string()));
            }
            if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
                return Err(FrameError::MalformedHeader(
                    "content-length is derived from the body".to_string(),
                ));
            }
            if !self.kind.escapes_headers() {
                let bad_name = name.contains([':', '\n', '\r']);
                let bad_value = value.contains(['\n', '\r']);
                if bad_name || bad_value {
                    return Err(FrameError::MalformedHeader(format!(
                        "{} headers cannot carry ':' in names or line breaks",
                        self.kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut dst = bytes::BytesMut::new();
        crate::codec::encode_frame(self, &mut dst);
        dst.freeze()
    }

    /// Decode exactly one frame from a complete buffer.
    pub fn decode(input: &[u8]) -> Result<Self> {
        let mut buf = bytes::BytesMut::from(input);
        crate::codec::decode_frame(&mut buf, &crate::codec::FrameConfig::default())?
            .ok_or(FrameError::Incomplete)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct RedactedHeaders<'a>(&'a Headers);

        impl fmt::Debug for RedactedHeaders<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut map = f.debug_map();
                for (name, value) in self.0 {
                    if header::is_sensitive(name) {
                        map.entry(name, &format_args!("<redacted:{} bytes>", value.len()));
                    } else {
                        map.entry(name, value);
                    }
                }
                map.finish()
            }
        }

        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("headers", &RedactedHeaders(&self.headers))
            .field("body", &format_args!("<{} bytes>", self.body.len()))
            .finish()
    }
}
