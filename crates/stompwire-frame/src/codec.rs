use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::frame::{Frame, FrameKind, Headers};
use crate::header;

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum number of header lines per frame.
pub const DEFAULT_MAX_HEADERS: usize = 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum encoded frame size in bytes. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Maximum header lines per frame. Default: 1024.
    pub max_headers: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// COMMAND\n
/// name:value\n        (repeated; escaped except for CONNECT/CONNECTED)
/// content-length:N\n  (only when the body is non-empty)
/// \n
/// <body>\0
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    let escape = frame.kind.escapes_headers();
    dst.reserve(64 + frame.body.len());
    dst.put_slice(frame.kind.as_str().as_bytes());
    dst.put_u8(b'\n');

    for (name, value) in &frame.headers {
        if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
            continue;
        }
        put_header_part(dst, name, escape);
        dst.put_u8(b':');
        put_header_part(dst, value, escape);
        dst.put_u8(b'\n');
    }

    if !frame.body.is_empty() {
        dst.put_slice(header::CONTENT_LENGTH.as_bytes());
        dst.put_u8(b':');
        dst.put_slice(frame.body.len().to_string().as_bytes());
        dst.put_u8(b'\n');
    }

    dst.put_u8(b'\n');
    dst.put_slice(&frame.body);
    dst.put_u8(0);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Leading heart-beat EOLs are consumed. On success, consumes the frame bytes
/// from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    let heartbeats = src
        .iter()
        .take_while(|&&b| b == b'\n' || b == b'\r')
        .count();
    src.advance(heartbeats);
    if src.is_empty() {
        return Ok(None);
    }

    // Command line.
    let Some(command_end) = find_byte(src, 0, b'\n') else {
        return need_more(src, config);
    };
    let command = std::str::from_utf8(trim_cr(&src[..command_end]))
        .map_err(|_| FrameError::InvalidUtf8)?;
    let kind = FrameKind::parse(command)
        .ok_or_else(|| FrameError::UnknownCommand(truncate(command).to_string()))?;

    // Header lines up to the blank line.
    let mut headers = Headers::new();
    let mut content_length: Option<usize> = None;
    let mut header_count = 0usize;
    let mut pos = command_end + 1;
    let body_start = loop {
        let Some(line_end) = find_byte(src, pos, b'\n') else {
            return need_more(src, config);
        };
        let line = trim_cr(&src[pos..line_end]);
        pos = line_end + 1;
        if line.is_empty() {
            break pos;
        }

        header_count += 1;
        if header_count > config.max_headers {
            return Err(FrameError::TooManyHeaders {
                count: header_count,
                max: config.max_headers,
            });
        }

        let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
        let (raw_name, raw_value) = line.split_once(':').ok_or_else(|| {
            FrameError::MalformedHeader(format!("missing ':' in '{}'", truncate(line)))
        })?;
        let (name, value) = if kind.escapes_headers() {
            (unescape(raw_name)?, unescape(raw_value)?)
        } else {
            (raw_name.to_string(), raw_value.to_string())
        };

        if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
            if content_length.is_none() {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(truncate(&value).to_string()))?;
                content_length = Some(len);
            }
            continue;
        }
        headers.entry(name).or_insert(value);
    };

    // Body.
    let body_end = match content_length {
        Some(len) => {
            let total = body_start.saturating_add(len).saturating_add(1);
            if total > config.max_frame_size {
                return Err(FrameError::FrameTooLarge {
                    size: total,
                    max: config.max_frame_size,
                });
            }
            if src.len() < total {
                return Ok(None);
            }
            if src[body_start + len] != 0 {
                return Err(FrameError::MissingTerminator);
            }
            body_start + len
        }
        None => match find_byte(src, body_start, 0) {
            Some(end) => end,
            None => return need_more(src, config),
        },
    };

    let total = body_end + 1;
    if total > config.max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: config.max_frame_size,
        });
    }

    for &required in kind.required_headers() {
        if !headers.contains_key(required) {
            return Err(FrameError::MissingHeader {
                kind,
                header: required,
            });
        }
    }

    src.advance(body_start);
    let body: Bytes = src.split_to(body_end - body_start).freeze();
    src.advance(1); // NUL

    Ok(Some(Frame {
        kind,
        headers,
        body,
    }))
}

fn need_more(src: &BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    if src.len() > config.max_frame_size {
        return Err(FrameError::FrameTooLarge {
            size: src.len(),
            max: config.max_frame_size,
        });
    }
    Ok(None)
}

fn find_byte(src: &[u8], from: usize, needle: u8) -> Option<usize> {
    src.get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|idx| from + idx)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(64) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn put_header_part(dst: &mut BytesMut, s: &str, escape: bool) {
    if !escape {
        dst.put_slice(s.as_bytes());
        return;
    }
    for &b in s.as_bytes() {
        match b {
            b'\\' => dst.put_slice(b"\\\\"),
            b'\n' => dst.put_slice(b"\\n"),
            b'\r' => dst.put_slice(b"\\r"),
            b':' => dst.put_slice(b"\\c"),
            other => dst.put_u8(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
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
            Some(other) => {
                return Err(FrameError::MalformedHeader(format!(
                    "invalid escape sequence '\\{other}'"
                )))
            }
            None => {
                return Err(FrameError::MalformedHeader(
                    "dangling escape at end of header".to_string(),
                ))
            }
        }
    }
    Ok(out)
}

/// `tokio_util` codec for STOMP frames, for use with `Framed`/`FramedRead`.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct StompCodec {
    config: FrameConfig,
}

#[cfg(feature = "async")]
impl StompCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for StompCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.iter().all(|&b| b == b'\n' || b == b'\r') => Ok(None),
            None => Err(FrameError::Incomplete),
        }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Frame> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        <Self as tokio_util::codec::Encoder<&Frame>>::encode(self, &frame, dst)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<&Frame> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        encode_frame(frame, dst);
        let size = dst.len() - start;
        if size > self.config.max_frame_size {
            dst.truncate(start);
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    fn decode_all(wire: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(wire);
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut buf, &FrameConfig::default()).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "leftover bytes: {buf:?}");
        frames
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::send("/app/chat", "hello");
        let wire = frame.encode();
        assert_eq!(
            wire.as_ref(),
            b"SEND\ndestination:/app/chat\ncontent-length:5\n\nhello\0"
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = [
            Frame::new(FrameKind::Connect)
                .with_header("accept-version", "1.2,1.1,1.0")
                .with_header("host", "localhost")
                .with_header("heart-beat", "10000,10000"),
            Frame::new(FrameKind::Connected).with_header("version", "1.2"),
            Frame::subscribe("/topic/messages", "sub-0"),
            Frame::unsubscribe("sub-0"),
            Frame::send("/app/chat", r#"{"user":"ada","message":"hi"}"#)
                .with_header("content-type", "application/json"),
            Frame::new(FrameKind::Message)
                .with_header("destination", "/topic/messages")
                .with_header("subscription", "sub-0")
                .with_header("message-id", "m-1")
                .with_body("ada: hi"),
            Frame::new(FrameKind::Receipt).with_header("receipt-id", "r-1"),
            Frame::new(FrameKind::Error)
                .with_header("message", "bad: thing\nhappened")
                .with_body("details"),
            Frame::disconnect(),
            Frame::send("/bin", vec![0u8, 1, 2, 0, 255]),
            Frame::send("/q", "x")
                .with_header("note", "  padded value ")
                .with_header("selector", ""),
            Frame::new(FrameKind::Connected)
                .with_header("version", "1.2")
                .with_header("server", " broker ")
                .with_header("session", ""),
        ];

        for frame in frames {
            let wire = frame.encode();
            let decoded = Frame::decode(&wire).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::send("/q", "").with_header("a:b", "line1\nline2\\\r");
        let wire = frame.encode();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("a\\cb:line1\\nline2\\\\\\r\n"));
        assert_eq!(Frame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn test_connect_headers_not_unescaped() {
        let wire = b"CONNECTED\nserver:broker\\c1\n\n\0";
        let frame = Frame::decode(wire).unwrap();
        assert_eq!(frame.header("server"), Some("broker\\c1"));
    }

    #[test]
    fn test_decode_without_content_length_reads_to_nul() {
        let frames = decode_all(b"MESSAGE\ndestination:/topic/a\nsubscription:sub-0\n\nhello\0");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body.as_ref(), b"hello");
    }

    #[test]
    fn test_decode_crlf_line_endings() {
        let frames = decode_all(b"CONNECTED\r\nversion:1.2\r\n\r\n\0");
        assert_eq!(frames[0].kind, FrameKind::Connected);
        assert_eq!(frames[0].header("version"), Some("1.2"));
    }

    #[test]
    fn test_heartbeats_between_frames_skipped() {
        let mut wire = BytesMut::new();
        wire.put_slice(b"\n\r\n\n");
        encode_frame(&Frame::disconnect(), &mut wire);
        wire.put_slice(b"\n\n");
        encode_frame(&Frame::unsubscribe("sub-1"), &mut wire);
        wire.put_slice(b"\n");

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, FrameKind::Disconnect);
        assert_eq!(frames[1].kind, FrameKind::Unsubscribe);
    }

    #[test]
    fn test_first_repeated_header_wins() {
        let frames = decode_all(
            b"MESSAGE\ndestination:/a\ndestination:/b\nsubscription:s\n\n\0",
        );
        assert_eq!(frames[0].destination(), Some("/a"));
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&b"SEND\ndestination:/q"[..]);
        let result = decode_frame(&mut buf, &FrameConfig::default()).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 19, "incomplete input must not be consumed");
    }

    #[test]
    fn test_decode_incomplete_body() {
        let wire = Frame::send("/q", "hello world").encode();
        let mut buf = BytesMut::from(&wire[..wire.len() - 3]);
        assert!(decode_frame(&mut buf, &FrameConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_unknown_command() {
        let result = Frame::decode(b"BEGIN\ntransaction:t1\n\n\0");
        assert!(matches!(result, Err(FrameError::UnknownCommand(c)) if c == "BEGIN"));
    }

    #[test]
    fn test_decode_missing_required_header() {
        let result = Frame::decode(b"SEND\n\nbody\0");
        assert!(matches!(
            result,
            Err(FrameError::MissingHeader {
                kind: FrameKind::Send,
                header: "destination"
            })
        ));
    }

    #[test]
    fn test_decode_header_without_colon() {
        let result = Frame::decode(b"SEND\ndestination\n\n\0");
        assert!(matches!(result, Err(FrameError::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_invalid_escape() {
        let result = Frame::decode(b"SEND\ndestination:/a\\t\n\n\0");
        assert!(matches!(result, Err(FrameError::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_bad_content_length() {
        let result = Frame::decode(b"SEND\ndestination:/a\ncontent-length:abc\n\n\0");
        assert!(matches!(result, Err(FrameError::InvalidContentLength(_))));
    }

    #[test]
    fn test_decode_content_length_without_terminator() {
        let result = Frame::decode(b"SEND\ndestination:/a\ncontent-length:2\n\nabc\0");
        assert!(matches!(result, Err(FrameError::MissingTerminator)));
    }

    #[test]
    fn test_frame_too_large() {
        let config = FrameConfig {
            max_frame_size: 32,
            ..FrameConfig::default()
        };
        let wire = Frame::send("/q", vec![b'x'; 64]).encode();
        let mut buf = BytesMut::from(&wire[..]);
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_unterminated_garbage_exceeding_limit() {
        let config = FrameConfig {
            max_frame_size: 16,
            ..FrameConfig::default()
        };
        let mut buf = BytesMut::from(&b"SEND\ndestination:/a/very/long/destination"[..]);
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_too_many_headers() {
        let config = FrameConfig {
            max_headers: 2,
            ..FrameConfig::default()
        };
        let mut buf = BytesMut::from(&b"SEND\ndestination:/a\nx:1\ny:2\n\n\0"[..]);
        let result = decode_frame(&mut buf, &config);
        assert!(matches!(
            result,
            Err(FrameError::TooManyHeaders { count: 3, max: 2 })
        ));
    }

    #[test]
    fn test_malformed_classification() {
        assert!(FrameError::MissingTerminator.is_malformed());
        assert!(FrameError::UnknownCommand("X".into()).is_malformed());
        assert!(!FrameError::Incomplete.is_malformed());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_framed_read_reassembles_stream() {
        use futures_util::StreamExt;
        use tokio_util::codec::FramedRead;

        let mut wire = BytesMut::new();
        encode_frame(&Frame::subscribe("/topic/a", "sub-0"), &mut wire);
        wire.put_slice(b"\n");
        encode_frame(&Frame::send("/app/chat", "payload"), &mut wire);

        let bytes = wire.to_vec();
        let mut framed = FramedRead::new(bytes.as_slice(), StompCodec::default());

        let first = framed.next().await.unwrap().unwrap();
        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(first.kind, FrameKind::Subscribe);
        assert_eq!(second.body.as_ref(), b"payload");
        assert!(framed.next().await.is_none());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_framed_read_truncated_stream_errors() {
        use futures_util::StreamExt;
        use tokio_util::codec::FramedRead;

        let wire = Frame::send("/app/chat", "payload").encode();
        let truncated = wire[..wire.len() - 2].to_vec();
        let mut framed = FramedRead::new(truncated.as_slice(), StompCodec::default());
        assert!(matches!(
            framed.next().await,
            Some(Err(FrameError::Incomplete))
        ));
    }

    #[cfg(feature = "async")]
    #[test]
    fn test_encoder_enforces_max_frame_size() {
        use tokio_util::codec::Encoder;

        let mut codec = StompCodec::new(FrameConfig {
            max_frame_size: 16,
            ..FrameConfig::default()
        });
        let mut dst = BytesMut::new();
        let result = codec.encode(&Frame::send("/q", vec![b'x'; 64]), &mut dst);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
        assert!(dst.is_empty());
    }
}
