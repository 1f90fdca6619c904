use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// Why a channel stopped delivering data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote side closed the connection.
    PeerClosed,
    /// The local side requested the close.
    Local,
    /// The transport task went away without reporting a reason.
    Dropped,
    /// An I/O or protocol error tore the connection down.
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Dropped => f.write_str("transport dropped"),
            CloseReason::Failed(detail) => write!(f, "transport failed: {detail}"),
        }
    }
}

/// Inbound notification from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A chunk of bytes. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// The channel is gone. No further events follow.
    Closed(CloseReason),
}

/// Outbound instruction consumed by a transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Data(Bytes),
    Close,
}

/// The transport-side half of a [`Channel`].
///
/// Adapters drain `outgoing` into the wire and push wire data into `events`.
#[derive(Debug)]
pub struct ChannelIo {
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
    pub events: mpsc::UnboundedSender<ChannelEvent>,
}

/// An open full-duplex channel to a broker.
#[derive(Debug)]
pub struct Channel {
    sender: ChannelSender,
    receiver: ChannelReceiver,
}

impl Channel {
    /// Create a channel and the transport-side half that services it.
    pub fn new(peer: impl Into<String>) -> (Self, ChannelIo) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let peer: Arc<str> = Arc::from(peer.into());
        let channel = Self {
            sender: ChannelSender {
                tx: out_tx,
                peer: Arc::clone(&peer),
            },
            receiver: ChannelReceiver {
                rx: ev_rx,
                finished: false,
            },
        };
        let io = ChannelIo {
            outgoing: out_rx,
            events: ev_tx,
        };
        (channel, io)
    }

    /// Queue bytes for transmission.
    pub fn send(&self, data: Bytes) -> Result<()> {
        self.sender.send(data)
    }

    /// Wait for the next inbound event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    /// Request an orderly close; bytes queued before the close are still written.
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn peer(&self) -> &str {
        self.sender.peer()
    }

    /// Split into independently owned write and read halves.
    pub fn into_split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Write half of a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Outgoing>,
    peer: Arc<str>,
}

impl ChannelSender {
    /// Queue bytes for transmission.
    pub fn send(&self, data: Bytes) -> Result<()> {
        self.tx
            .send(Outgoing::Data(data))
            .map_err(|_| TransportError::Shutdown)
    }

    /// Request an orderly close. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Read half of a [`Channel`].
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    finished: bool,
}

impl ChannelReceiver {
    /// Wait for the next inbound event.
    ///
    /// Exactly one `Closed` event is yielded; afterwards this returns `None`.
    /// If the transport vanishes without reporting, `Closed(Dropped)` is synthesized.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(ChannelEvent::Closed(reason)) => {
                self.finished = true;
                Some(ChannelEvent::Closed(reason))
            }
            Some(event) => Some(event),
            None => {
                self.finished = true;
                Some(ChannelEvent::Closed(CloseReason::Dropped))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_flows_both_ways() {
        let (mut channel, mut io) = Channel::new("test");
        channel.send(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(
            io.outgoing.recv().await,
            Some(Outgoing::Data(Bytes::from_static(b"ping")))
        );

        io.events
            .send(ChannelEvent::Data(Bytes::from_static(b"pong")))
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Data(Bytes::from_static(b"pong")))
        );
    }

    #[tokio::test]
    async fn closed_is_reported_once() {
        let (mut channel, io) = Channel::new("test");
        io.events
            .send(ChannelEvent::Closed(CloseReason::PeerClosed))
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Closed(CloseReason::PeerClosed))
        );
        assert_eq!(channel.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_transport_synthesizes_close() {
        let (channel, io) = Channel::new("test");
        drop(io);
        let (sender, mut receiver) = channel.into_split();
        assert_eq!(
            receiver.recv().await,
            Some(ChannelEvent::Closed(CloseReason::Dropped))
        );
        assert!(matches!(
            sender.send(Bytes::from_static(b"x")),
            Err(TransportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn close_is_queued_after_data() {
        let (channel, mut io) = Channel::new("test");
        channel.send(Bytes::from_static(b"last")).unwrap();
        channel.close();
        assert!(matches!(io.outgoing.recv().await, Some(Outgoing::Data(_))));
        assert_eq!(io.outgoing.recv().await, Some(Outgoing::Close));
    }
}
