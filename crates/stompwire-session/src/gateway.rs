//! Outbound SEND construction and the disconnected publish buffer.

use std::collections::VecDeque;

use bytes::Bytes;
use serde::Serialize;
use stompwire_frame::{header, Frame, FrameConfig, FrameKind, Headers};
use tracing::debug;

use crate::config::{OverflowPolicy, PublishBuffer};
use crate::error::{Result, SessionError};
use crate::state::SessionState;

const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: String,
    pub body: Bytes,
    /// Extra SEND headers. `destination` and `content-length` are not allowed here.
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            headers: Headers::new(),
        }
    }

    /// Serialize `value` as the body and set `content-type: application/json`.
    pub fn json<T: Serialize + ?Sized>(destination: impl Into<String>, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(destination, body).with_header(header::CONTENT_TYPE, JSON_CONTENT_TYPE))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Validates publishes and holds the ones made while disconnected.
#[derive(Debug)]
pub struct PublishGateway {
    buffer: Option<PublishBuffer>,
    queue: VecDeque<Frame>,
    max_frame_size: usize,
}

/// Result of queueing a publish while disconnected.
#[derive(Debug, PartialEq, Eq)]
pub enum Enqueued {
    Buffered,
    /// Buffered after evicting this older frame.
    Evicted(Frame),
}

impl PublishGateway {
    pub fn new(buffer: Option<PublishBuffer>, frame: &FrameConfig) -> Self {
        Self {
            buffer,
            queue: VecDeque::new(),
            max_frame_size: frame.max_frame_size,
        }
    }

    /// Validate `message` and build its SEND frame.
    pub fn prepare(&self, message: OutboundMessage) -> Result<Frame> {
        if message.destination.trim().is_empty() {
            return Err(SessionError::InvalidDestination(
                "destination must not be empty".to_string(),
            ));
        }
        for name in message.headers.keys() {
            validate_header_name(name)?;
        }

        let mut frame = Frame::new(FrameKind::Send).with_body(message.body);
        frame.headers = message.headers;
        frame
            .headers
            .insert(header::DESTINATION.to_string(), message.destination);

        let size = frame.encode().len();
        if size > self.max_frame_size {
            return Err(SessionError::PayloadTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(frame)
    }

    /// Hold a frame until the next successful connect.
    pub fn enqueue(&mut self, frame: Frame, state: SessionState) -> Result<Enqueued> {
        let Some(buffer) = self.buffer else {
            return Err(SessionError::NotConnected(state));
        };

        if self.queue.len() < buffer.capacity {
            self.queue.push_back(frame);
            return Ok(Enqueued::Buffered);
        }

        match buffer.overflow {
            OverflowPolicy::RejectNewest => Err(SessionError::BufferFull {
                capacity: buffer.capacity,
            }),
            OverflowPolicy::DropOldest => {
                self.queue.push_back(frame);
                match self.queue.pop_front() {
                    Some(evicted) => {
                        debug!(
                            destination = evicted.destination().unwrap_or_default(),
                            "evicted oldest buffered publish"
                        );
                        Ok(Enqueued::Evicted(evicted))
                    }
                    None => Ok(Enqueued::Buffered),
                }
            }
        }
    }

    /// Take every buffered frame, oldest first.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.queue.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

fn validate_header_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "header name must not be empty"
    } else if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
        "content-length is derived from the body"
    } else if name == header::DESTINATION {
        "destination is set from the publish target"
    } else {
        return Ok(());
    };
    Err(SessionError::InvalidHeader {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}
