use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use stompwire_frame::{header, Frame, Headers};
use tokio::sync::mpsc;

/// Contents of a broker ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// The `message` header, when the broker sent one.
    pub message: Option<String>,
    /// Body decoded lossily as UTF-8.
    pub body: String,
    pub headers: Headers,
}

impl ErrorDetail {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            message: frame.header(header::MESSAGE).map(str::to_string),
            body: String::from_utf8_lossy(&frame.body).into_owned(),
            headers: frame.headers.clone(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, self.body.trim()) {
            (Some(message), "") => f.write_str(message),
            (Some(message), body) => write!(f, "{message}: {body}"),
            (None, "") => f.write_str("unspecified broker error"),
            (None, body) => f.write_str(body),
        }
    }
}

/// Why a session ended up DISCONNECTED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close` was called.
    Closed,
    /// The first `open` attempt failed and initial retries are off.
    OpenFailed(String),
    /// The reconnect policy gave up.
    ReconnectExhausted { attempts: u32 },
}

/// Lifecycle and diagnostic notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        version: String,
        server: Option<String>,
        session: Option<String>,
    },
    /// The connection was lost; another attempt follows after `delay`.
    Reconnecting {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// Terminal: no further attempts until `open` is called again.
    Disconnected(DisconnectReason),
    /// The broker sent an ERROR frame while connected.
    Error(ErrorDetail),
    /// A MESSAGE matched no live subscription and was discarded.
    Unroutable {
        destination: Option<String>,
        subscription: Option<String>,
    },
    /// The broker acknowledged a frame carrying a `receipt` header.
    Receipt(String),
    /// A buffered publish was evicted to make room.
    PublishDropped { destination: String },
}

/// Receiving end of a session's event stream.
///
/// Events are queued without bound; dropping this handle discards them.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Next event. `None` once the session task has shut down.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
