//! STOMP messaging client.
//!
//! stompwire connects to STOMP brokers over TCP, Unix sockets or WebSockets,
//! keeps subscriptions alive across reconnects and routes inbound messages to
//! consumers in arrival order.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoint parsing and the byte-channel transports
//! - [`frame`]: the frame model and the STOMP 1.2 codec
//! - [`session`]: the reconnecting session (behind the default `session` feature)
//!
//! ```no_run
//! use stompwire::frame::Frame;
//! use stompwire::session::{ReconnectPolicy, Session};
//! use stompwire::transport::DefaultTransport;
//!
//! # async fn demo() -> stompwire::session::Result<()> {
//! let (session, _events) = Session::new(DefaultTransport);
//! session
//!     .subscribe("/topic/messages", |frame: &Frame| {
//!         println!("{}", frame.body_text().unwrap_or_default());
//!     })
//!     .await?;
//! session
//!     .open("ws://localhost:8080/ws", ReconnectPolicy::default())
//!     .await?;
//! session.publish("/app/chat", "hello").await?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use stompwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use stompwire_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use stompwire_session::*;
}
