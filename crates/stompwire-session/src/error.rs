use std::time::Duration;

use crate::event::ErrorDetail;
use crate::registry::SubscriptionId;
use crate::state::SessionState;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport could not open a channel to the broker.
    #[error("connect failed: {0}")]
    ConnectFailed(#[from] stompwire_transport::TransportError),

    /// No CONNECTED frame arrived within the configured handshake timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The broker answered the handshake with something unusable.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Inbound bytes could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] stompwire_frame::FrameError),

    /// The broker sent an ERROR frame.
    #[error("broker error: {0}")]
    Protocol(ErrorDetail),

    /// Publish attempted without a connection and without a publish buffer.
    #[error("not connected (session is {0})")]
    NotConnected(SessionState),

    /// The publish buffer is at capacity and rejects new messages.
    #[error("publish buffer full (capacity {capacity})")]
    BufferFull { capacity: usize },

    #[error("unknown subscription '{0}'")]
    UnknownSubscription(SubscriptionId),

    /// The reconnect policy gave up.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The encoded frame would exceed the configured frame size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// The session was closed while the operation was pending.
    #[error("session closed")]
    Closed,

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session task is gone.
    #[error("session task has shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, SessionError>;
