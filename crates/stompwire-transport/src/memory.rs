//! In-process transport.
//!
//! Every `open` hands the broker side of a fresh channel to a
//! [`MemoryListener`]. Useful for tests and for embedding a broker in the
//! same process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{Channel, ChannelEvent, ChannelIo, CloseReason, Outgoing};
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Client side of the memory transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    acceptor: mpsc::UnboundedSender<MemoryConnection>,
    refusing: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
}

/// Broker side of the memory transport.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Broker end of one memory channel.
#[derive(Debug)]
pub struct MemoryConnection {
    endpoint: Endpoint,
    io: ChannelIo,
    client_closed: bool,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                acceptor: tx,
                refusing: Arc::new(AtomicBool::new(false)),
                opened: Arc::new(AtomicUsize::new(0)),
            },
            MemoryListener { incoming: rx },
        )
    }

    /// Make subsequent `open` calls fail with a connection-refused error.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `open` attempts, successful or not.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let endpoint = endpoint.clone();
        let refused = self.refusing.load(Ordering::SeqCst);
        let acceptor = self.acceptor.clone();
        Box::pin(async move {
            if refused {
                return Err(TransportError::connect(
                    endpoint.as_str(),
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ));
            }
            let (channel, io) = Channel::new(endpoint.as_str());
            let conn = MemoryConnection {
                endpoint: endpoint.clone(),
                io,
                client_closed: false,
            };
            acceptor.send(conn).map_err(|_| {
                TransportError::connect(
                    endpoint.as_str(),
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "memory listener dropped",
                    ),
                )
            })?;
            debug!(endpoint = %endpoint, "opened memory channel");
            Ok(channel)
        })
    }
}

impl MemoryListener {
    /// Wait for the next client channel. `None` once every transport handle is dropped.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.incoming.recv().await
    }
}

impl MemoryConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Next chunk written by the client. `None` once the client closed or dropped the channel.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.client_closed {
            return None;
        }
        match self.io.outgoing.recv().await {
            Some(Outgoing::Data(bytes)) => Some(bytes),
            Some(Outgoing::Close) | None => {
                self.client_closed = true;
                None
            }
        }
    }

    /// Deliver bytes to the client. Returns `false` if the client side is gone.
    pub fn send(&self, data: impl Into<Bytes>) -> bool {
        self.io.events.send(ChannelEvent::Data(data.into())).is_ok()
    }

    /// Close from the broker side.
    pub fn close(self) {
        let _ = self
            .io
            .events
            .send(ChannelEvent::Closed(CloseReason::PeerClosed));
    }

    /// Tear the channel down with an error.
    pub fn fail(self, detail: impl Into<String>) {
        let _ = self
            .io
            .events
            .send(ChannelEvent::Closed(CloseReason::Failed(detail.into())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_hands_connection_to_listener() {
        let (transport, mut listener) = MemoryTransport::new();
        let ep = Endpoint::parse("memory://broker").unwrap();

        let mut channel = transport.open(&ep).await.unwrap();
        let mut conn = listener.accept().await.unwrap();
        assert_eq!(conn.endpoint(), &ep);

        channel.send(Bytes::from_static(b"up")).unwrap();
        assert_eq!(conn.recv().await.unwrap().as_ref(), b"up");

        assert!(conn.send(Bytes::from_static(b"down")));
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Data(Bytes::from_static(b"down")))
        );

        conn.close();
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Closed(CloseReason::PeerClosed))
        );
    }

    #[tokio::test]
    async fn refusing_transport_fails_open() {
        let (transport, _listener) = MemoryTransport::new();
        transport.set_refusing(true);
        let ep = Endpoint::parse("memory://broker").unwrap();

        let result = transport.open(&ep).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn client_close_ends_broker_reads() {
        let (transport, mut listener) = MemoryTransport::new();
        let ep = Endpoint::parse("memory://broker").unwrap();

        let channel = transport.open(&ep).await.unwrap();
        let mut conn = listener.accept().await.unwrap();
        channel.close();
        assert!(conn.recv().await.is_none());
        assert!(conn.recv().await.is_none());
    }
}
