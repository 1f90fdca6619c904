//! Connection and subscription session manager for STOMP brokers.
//!
//! This is the "just works" layer. Open a session against an endpoint,
//! subscribe consumers to destinations, publish messages, and let the
//! session handle the handshake, heart-beats and reconnection.
//!
//! All session state lives in a single task. [`Session`] is a cheap, cloneable
//! handle that serializes every call into that task's queue, so consumers see
//! messages in wire order and never concurrently.

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handshake;
pub mod registry;
pub mod session;
pub mod state;

pub use config::{
    Backoff, HeartbeatConfig, OverflowPolicy, PublishBuffer, ReconnectPolicy, SessionConfig,
    DEFAULT_RECONNECT_DELAY,
};
pub use error::{Result, SessionError};
pub use event::{DisconnectReason, ErrorDetail, SessionEvent, SessionEvents};
pub use gateway::{Enqueued, OutboundMessage, PublishGateway};
pub use handshake::{ConnectedInfo, NegotiatedHeartbeat, ACCEPT_VERSIONS};
pub use registry::{Consumer, RouteOutcome, Subscription, SubscriptionId, SubscriptionRegistry};
pub use session::Session;
pub use state::SessionState;
