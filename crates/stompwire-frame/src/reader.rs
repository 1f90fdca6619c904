use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reassembles frames from arbitrarily split chunks.
///
/// Feed transport deliveries in arrival order and drain complete frames.
/// Once a decode error is returned the buffer is poisoned: the stream is out
/// of sync and must be discarded.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameBuffer {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Append a chunk received from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        decode_frame(&mut self.buf, &self.config)
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

/// Reads complete frames from any blocking `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buffer: FrameBuffer,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::new(config),
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::Incomplete)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::Incomplete);
            }

            self.buffer.feed(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;
    use crate::frame::FrameKind;

    #[test]
    fn read_single_frame() {
        let wire = Frame::send("/app/chat", "hello").encode();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.kind, FrameKind::Send);
        assert_eq!(frame.body.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame(&Frame::send("/a", "one"), &mut wire);
        encode_frame(&Frame::send("/b", "two"), &mut wire);
        encode_frame(&Frame::send("/c", "three"), &mut wire);

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        let f1 = reader.read_frame().unwrap();
        let f2 = reader.read_frame().unwrap();
        let f3 = reader.read_frame().unwrap();

        assert_eq!((f1.destination(), f1.body.as_ref()), (Some("/a"), b"one".as_ref()));
        assert_eq!((f2.destination(), f2.body.as_ref()), (Some("/b"), b"two".as_ref()));
        assert_eq!((f3.destination(), f3.body.as_ref()), (Some("/c"), b"three".as_ref()));
    }

    #[test]
    fn partial_read_handling() {
        let wire = Frame::send("/slow", "slow").encode();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.destination(), Some("/slow"));
        assert_eq!(frame.body.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Incomplete));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let wire = Frame::send("/a", "only-part-of-it").encode();
        let mut reader = FrameReader::new(Cursor::new(wire[..12].to_vec()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Incomplete));
    }

    #[test]
    fn interrupted_read_retries() {
        let wire = Frame::disconnect().encode();

        let reader = InterruptedThenData {
            state: 0,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.kind, FrameKind::Disconnect);
    }

    #[test]
    fn buffer_reassembles_split_chunks() {
        let mut wire = BytesMut::new();
        encode_frame(&Frame::subscribe("/topic/a", "sub-0"), &mut wire);
        encode_frame(&Frame::subscribe("/topic/b", "sub-1"), &mut wire);

        let mut buffer = FrameBuffer::default();
        let mut frames = Vec::new();
        for chunk in wire.chunks(7) {
            buffer.feed(chunk);
            while let Some(frame) = buffer.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].destination(), Some("/topic/a"));
        assert_eq!(frames[1].destination(), Some("/topic/b"));
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn buffer_surfaces_garbage() {
        let mut buffer = FrameBuffer::default();
        buffer.feed(b"HELLO\n\n\0");
        let err = buffer.next_frame().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
