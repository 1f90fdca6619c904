use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelEvent, ChannelIo, CloseReason, Outgoing};
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// WebSocket transport (`ws://`, `wss://`).
///
/// Each WebSocket message is delivered as one data chunk; outbound chunks are
/// sent as text messages when they are valid UTF-8 and binary otherwise.
/// `wss://` needs a TLS backend enabled on `tokio-tungstenite`.
///
/// SockJS is not spoken. A Spring broker that registers `/chat` with SockJS
/// accepts raw WebSocket clients at `ws://host:8080/chat/websocket`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            if !matches!(endpoint.scheme(), Scheme::Ws | Scheme::Wss) {
                return Err(TransportError::UnsupportedScheme(
                    endpoint.scheme().to_string(),
                ));
            }

            let (socket, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::connect(endpoint.as_str(), std::io::Error::other(e)))?;
            debug!(endpoint = %endpoint, "websocket connected");

            let (channel, io) = Channel::new(endpoint.as_str());
            let ChannelIo {
                mut outgoing,
                events,
            } = io;
            let (mut write, mut read) = socket.split();

            let reader_events = events.clone();
            let reader = tokio::spawn(async move {
                while let Some(msg) = read.next().await {
                    let chunk = match msg {
                        Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                        Ok(Message::Binary(data)) => data,
                        Ok(Message::Close(frame)) => {
                            trace!(?frame, "websocket close frame");
                            let _ = reader_events.send(ChannelEvent::Closed(CloseReason::PeerClosed));
                            return;
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            let _ = reader_events
                                .send(ChannelEvent::Closed(CloseReason::Failed(err.to_string())));
                            return;
                        }
                    };
                    if reader_events.send(ChannelEvent::Data(chunk)).is_err() {
                        return;
                    }
                }
                let _ = reader_events.send(ChannelEvent::Closed(CloseReason::PeerClosed));
            });

            tokio::spawn(async move {
                while let Some(item) = outgoing.recv().await {
                    match item {
                        Outgoing::Data(bytes) => {
                            let msg = match std::str::from_utf8(&bytes) {
                                Ok(text) => Message::text(text.to_owned()),
                                Err(_) => Message::binary(bytes),
                            };
                            if let Err(err) = write.send(msg).await {
                                debug!(error = %err, "websocket write failed");
                                let _ = events
                                    .send(ChannelEvent::Closed(CloseReason::Failed(err.to_string())));
                                reader.abort();
                                return;
                            }
                        }
                        Outgoing::Close => break,
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                reader.abort();
                let _ = events.send(ChannelEvent::Closed(CloseReason::Local));
            });

            Ok(channel)
        })
    }
}
