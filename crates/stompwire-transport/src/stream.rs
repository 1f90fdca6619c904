use std::io::ErrorKind;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelEvent, ChannelIo, CloseReason, Outgoing};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{Result, TransportError};
use crate::traits::Transport;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Service a [`Channel`] over any async byte stream.
///
/// Spawns one reader and one writer task. The writer drains queued bytes in
/// order; on `Outgoing::Close` it shuts the stream down and stops the reader.
pub fn spawn_stream_channel<S>(stream: S, peer: impl Into<String>) -> Channel
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let peer = peer.into();
    let (channel, io) = Channel::new(peer.clone());
    let ChannelIo {
        mut outgoing,
        events,
    } = io;
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let reader_events = events.clone();
    let reader_peer = peer.clone();
    let reader = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        loop {
            buf.reserve(READ_CHUNK_SIZE);
            match read_half.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!(peer = %reader_peer, "stream closed by peer");
                    let _ = reader_events.send(ChannelEvent::Closed(CloseReason::PeerClosed));
                    return;
                }
                Ok(n) => {
                    trace!(peer = %reader_peer, bytes = n, "stream read");
                    let chunk = buf.split().freeze();
                    if reader_events.send(ChannelEvent::Data(chunk)).is_err() {
                        return;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(peer = %reader_peer, error = %err, "stream read failed");
                    let _ = reader_events
                        .send(ChannelEvent::Closed(CloseReason::Failed(err.to_string())));
                    return;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(item) = outgoing.recv().await {
            match item {
                Outgoing::Data(bytes) => {
                    let written = match write_half.write_all(&bytes).await {
                        Ok(()) => write_half.flush().await,
                        Err(err) => Err(err),
                    };
                    if let Err(err) = written {
                        debug!(peer = %peer, error = %err, "stream write failed");
                        let _ = events.send(ChannelEvent::Closed(CloseReason::Failed(err.to_string())));
                        reader.abort();
                        return;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = write_half.shutdown().await;
        reader.abort();
        let _ = events.send(ChannelEvent::Closed(CloseReason::Local));
    });

    channel
}

/// Plain TCP transport (`tcp://host:port`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            if endpoint.scheme() != Scheme::Tcp {
                return Err(TransportError::UnsupportedScheme(
                    endpoint.scheme().to_string(),
                ));
            }
            let stream = tokio::net::TcpStream::connect(endpoint.authority())
                .await
                .map_err(|e| TransportError::connect(endpoint.as_str(), e))?;
            stream.set_nodelay(true)?;
            debug!(endpoint = %endpoint, "connected over tcp");
            Ok(spawn_stream_channel(stream, endpoint.as_str()))
        })
    }
}

/// Unix domain socket transport (`unix:///path`).
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixTransport;

#[cfg(unix)]
impl Transport for UnixTransport {
    fn name(&self) -> &'static str {
        "unix-domain-socket"
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            if endpoint.scheme() != Scheme::Unix {
                return Err(TransportError::UnsupportedScheme(
                    endpoint.scheme().to_string(),
                ));
            }
            let stream = tokio::net::UnixStream::connect(endpoint.path())
                .await
                .map_err(|e| TransportError::connect(endpoint.as_str(), e))?;
            debug!(endpoint = %endpoint, "connected to unix domain socket");
            Ok(spawn_stream_channel(stream, endpoint.as_str()))
        })
    }
}
