use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::channel::Channel;
use crate::endpoint::{Endpoint, Scheme};
use crate::error::{Result, TransportError};

/// Opens full-duplex channels to broker endpoints.
///
/// The returned future must not borrow the transport; implementations clone
/// whatever state they need. This keeps `open` usable from a spawned task.
pub trait Transport: Send + Sync + 'static {
    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Establish a channel to `endpoint`.
    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        (**self).open(endpoint)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        (**self).open(endpoint)
    }
}

/// Picks an adapter from the endpoint scheme.
///
/// `memory://` endpoints are not served here; use [`crate::MemoryTransport`] directly.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport;

impl Transport for DefaultTransport {
    fn name(&self) -> &'static str {
        "default"
    }

    fn open(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Channel>> {
        match endpoint.scheme() {
            Scheme::Tcp => crate::stream::TcpTransport.open(endpoint),
            #[cfg(unix)]
            Scheme::Unix => crate::stream::UnixTransport.open(endpoint),
            #[cfg(feature = "websocket")]
            Scheme::Ws | Scheme::Wss => crate::ws::WebSocketTransport.open(endpoint),
            other => {
                let scheme = other.as_str().to_string();
                Box::pin(async move { Err(TransportError::UnsupportedScheme(scheme)) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_transport_rejects_memory_scheme() {
        let ep = Endpoint::parse("memory://broker").unwrap();
        let result = DefaultTransport.open(&ep).await;
        assert!(matches!(result, Err(TransportError::UnsupportedScheme(s)) if s == "memory"));
    }

    #[tokio::test]
    async fn default_transport_reports_connect_failure() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ep = Endpoint::parse(&addr.to_string()).unwrap();
        let result = DefaultTransport.open(&ep).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
