//! Full-duplex transport adapters for stompwire.
//!
//! Provides a unified channel interface over different byte-stream carriers:
//! - TCP (`tcp://host:port`)
//! - Unix domain sockets (`unix:///path/to.sock`, Unix only)
//! - WebSocket (`ws://` / `wss://`, behind the `websocket` feature)
//! - An in-process memory transport for tests and embedding
//!
//! This is the lowest layer of stompwire. Everything else builds on top of
//! the [`Channel`] type provided here.

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod stream;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod ws;

pub use channel::{Channel, ChannelEvent, ChannelIo, ChannelReceiver, ChannelSender, CloseReason, Outgoing};
pub use endpoint::{Endpoint, Scheme};
pub use error::{Result, TransportError};
pub use memory::{MemoryConnection, MemoryListener, MemoryTransport};
pub use stream::{spawn_stream_channel, TcpTransport};
pub use traits::{DefaultTransport, Transport};

#[cfg(unix)]
pub use stream::UnixTransport;

#[cfg(feature = "websocket")]
pub use ws::WebSocketTransport;
