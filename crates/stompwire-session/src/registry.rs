//! Subscription registry and inbound MESSAGE routing.

use std::fmt;

use stompwire_frame::{header, Frame, Headers};
use tokio::sync::mpsc;

/// Client-assigned subscription identifier (`sub-0`, `sub-1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Receives MESSAGE frames routed to a subscription.
///
/// Consumers run on the session task, one frame at a time, in wire order.
/// They should hand work off rather than block.
pub trait Consumer: Send + 'static {
    fn receive(&mut self, frame: &Frame);
}

impl<F> Consumer for F
where
    F: FnMut(&Frame) + Send + 'static,
{
    fn receive(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Forward frames into a channel. Frames are dropped once the receiver is gone.
impl Consumer for mpsc::UnboundedSender<Frame> {
    fn receive(&mut self, frame: &Frame) {
        let _ = self.send(frame.clone());
    }
}

/// One registered interest in a destination.
pub struct Subscription {
    id: SubscriptionId,
    destination: String,
    headers: Headers,
    consumer: Box<dyn Consumer>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Extra SUBSCRIBE headers (for example `ack`).
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The SUBSCRIBE frame that establishes this subscription on a connection.
    pub fn subscribe_frame(&self) -> Frame {
        let mut frame = Frame::subscribe(self.destination.clone(), self.id.as_str());
        for (name, value) in &self.headers {
            frame.headers.entry(name.clone()).or_insert_with(|| value.clone());
        }
        frame
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Where an inbound MESSAGE went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to the subscription named in the `subscription` header.
    BySubscription,
    /// Delivered by destination to this many subscriptions.
    ByDestination(usize),
    Unroutable,
}

/// Live subscriptions in registration order.
///
/// Entries persist across reconnects; only `remove` drops one.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer and assign it a fresh id. Ids are never reused.
    pub fn register(
        &mut self,
        destination: impl Into<String>,
        headers: Headers,
        consumer: Box<dyn Consumer>,
    ) -> &Subscription {
        let id = SubscriptionId(format!("sub-{}", self.next_id));
        self.next_id += 1;
        let index = self.entries.len();
        self.entries.push(Subscription {
            id,
            destination: destination.into(),
            headers,
            consumer,
        });
        &self.entries[index]
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let index = self.entries.iter().position(|s| &s.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.entries.iter().find(|s| &s.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// SUBSCRIBE frames for every live subscription, in registration order.
    pub fn subscribe_frames(&self) -> Vec<Frame> {
        self.entries.iter().map(Subscription::subscribe_frame).collect()
    }

    /// Deliver a MESSAGE frame.
    ///
    /// A `subscription` header is authoritative: the frame goes to that
    /// subscription or, if it is no longer registered, nowhere. Frames without
    /// the header go to every subscription on their destination, in
    /// registration order.
    pub fn route(&mut self, frame: &Frame) -> RouteOutcome {
        if let Some(target) = frame.header(header::SUBSCRIPTION) {
            return match self.entries.iter_mut().find(|s| s.id.as_str() == target) {
                Some(entry) => {
                    entry.consumer.receive(frame);
                    RouteOutcome::BySubscription
                }
                None => RouteOutcome::Unroutable,
            };
        }

        let Some(destination) = frame.destination() else {
            return RouteOutcome::Unroutable;
        };
        let mut delivered = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|s| s.destination == destination)
        {
            entry.consumer.receive(frame);
            delivered += 1;
        }

        if delivered == 0 {
            RouteOutcome::Unroutable
        } else {
            RouteOutcome::ByDestination(delivered)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use stompwire_frame::FrameKind;

    use super::*;

    fn message(destination: &str, subscription: &str, body: &str) -> Frame {
        Frame::new(FrameKind::Message)
            .with_header("destination", destination)
            .with_header("subscription", subscription)
            .with_header("message-id", "m-1")
            .with_body(body.to_string())
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Box<dyn Consumer>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer = move |frame: &Frame| {
            sink.lock()
                .unwrap()
                .push(frame.body_text().unwrap_or_default().to_string());
        };
        (seen, Box::new(consumer))
    }

    #[test]
    fn ids_are_sequential_and_never_reused() {
        let mut registry = SubscriptionRegistry::new();
        let a = registry.register("/topic/a", Headers::new(), Box::new(|_: &Frame| {})).id().clone();
        let b = registry.register("/topic/b", Headers::new(), Box::new(|_: &Frame| {})).id().clone();
        assert_eq!((a.as_str(), b.as_str()), ("sub-0", "sub-1"));

        registry.remove(&a).unwrap();
        let c = registry.register("/topic/a", Headers::new(), Box::new(|_: &Frame| {})).id().clone();
        assert_eq!(c.as_str(), "sub-2");
        assert!(registry.get(&a).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn subscribe_frames_follow_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        let mut extra = Headers::new();
        extra.insert("ack".to_string(), "client".to_string());
        registry.register("/topic/a", Headers::new(), Box::new(|_: &Frame| {}));
        registry.register("/queue/b", extra, Box::new(|_: &Frame| {}));

        let frames = registry.subscribe_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].destination(), Some("/topic/a"));
        assert_eq!(frames[0].header("id"), Some("sub-0"));
        assert_eq!(frames[1].destination(), Some("/queue/b"));
        assert_eq!(frames[1].header("id"), Some("sub-1"));
        assert_eq!(frames[1].header("ack"), Some("client"));
    }

    #[test]
    fn extra_headers_cannot_override_identity() {
        let mut registry = SubscriptionRegistry::new();
        let mut extra = Headers::new();
        extra.insert("id".to_string(), "forged".to_string());
        extra.insert("destination".to_string(), "/elsewhere".to_string());
        let frame = registry
            .register("/topic/a", extra, Box::new(|_: &Frame| {}))
            .subscribe_frame();
        assert_eq!(frame.header("id"), Some("sub-0"));
        assert_eq!(frame.destination(), Some("/topic/a"));
    }

    #[test]
    fn routes_by_subscription_header_first() {
        let mut registry = SubscriptionRegistry::new();
        let (first, c1) = recorder();
        let (second, c2) = recorder();
        registry.register("/topic/a", Headers::new(), c1);
        registry.register("/topic/a", Headers::new(), c2);

        let outcome = registry.route(&message("/topic/a", "sub-1", "only-second"));
        assert_eq!(outcome, RouteOutcome::BySubscription);
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec!["only-second"]);
    }

    #[test]
    fn falls_back_to_destination_in_order() {
        let mut registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let order = Arc::clone(&order);
            registry.register(
                "/topic/a",
                Headers::new(),
                Box::new(move |_: &Frame| order.lock().unwrap().push(tag)),
            );
        }

        let mut frame = message("/topic/a", "unused", "x");
        frame.headers.remove("subscription");
        let outcome = registry.route(&frame);
        assert_eq!(outcome, RouteOutcome::ByDestination(2));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn unmatched_message_is_unroutable() {
        let mut registry = SubscriptionRegistry::new();
        let (seen, consumer) = recorder();
        registry.register("/topic/a", Headers::new(), consumer);

        assert_eq!(
            registry.route(&message("/topic/other", "sub-7", "x")),
            RouteOutcome::Unroutable
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn removed_subscription_no_longer_receives() {
        let mut registry = SubscriptionRegistry::new();
        let (gone, c0) = recorder();
        let (sibling, c1) = recorder();
        let id = registry.register("/topic/a", Headers::new(), c0).id().clone();
        registry.register("/topic/a", Headers::new(), c1);
        registry.remove(&id).unwrap();

        // The broker still had one copy in flight for sub-0 and sends sub-1 its own.
        assert_eq!(
            registry.route(&message("/topic/a", "sub-0", "m-1")),
            RouteOutcome::Unroutable
        );
        assert_eq!(
            registry.route(&message("/topic/a", "sub-1", "m-1")),
            RouteOutcome::BySubscription
        );
        assert!(gone.lock().unwrap().is_empty());
        assert_eq!(*sibling.lock().unwrap(), vec!["m-1"]);
    }

    #[tokio::test]
    async fn channel_consumer_forwards_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = SubscriptionRegistry::new();
        registry.register("/topic/a", Headers::new(), Box::new(tx));

        registry.route(&message("/topic/a", "sub-0", "hello"));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.body_text(), Some("hello"));
    }
}
