//! The session task and its handle.
//!
//! A [`Session`] owns no state itself. Every call is queued to a single
//! driver task that owns the registry, the publish buffer and the current
//! connection. Transport callbacks and timers are funnelled into the same
//! task, tagged with the connection generation that spawned them, so events
//! from a torn-down connection are recognised and dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use stompwire_frame::{header, Frame, FrameBuffer, FrameKind, Headers};
use stompwire_transport::{
    Channel, ChannelEvent, ChannelSender, Endpoint, Transport, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::{ReconnectPolicy, SessionConfig};
use crate::error::{Result, SessionError};
use crate::event::{DisconnectReason, ErrorDetail, SessionEvent, SessionEvents};
use crate::gateway::{Enqueued, OutboundMessage, PublishGateway};
use crate::handshake::{self, ConnectedInfo, NegotiatedHeartbeat};
use crate::registry::{Consumer, RouteOutcome, SubscriptionId, SubscriptionRegistry};
use crate::state::SessionState;

const HEARTBEAT_EOL: &[u8] = b"\n";

/// Missed incoming intervals tolerated before the broker is considered gone.
const HEARTBEAT_GRACE: u32 = 2;

const MIN_HEARTBEAT_TICK: Duration = Duration::from_millis(10);

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Open {
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
    Subscribe {
        destination: String,
        headers: Headers,
        consumer: Box<dyn Consumer>,
        reply: Reply<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: Reply<()>,
    },
    Publish {
        message: OutboundMessage,
        reply: Reply<()>,
    },
}

enum Internal {
    Opened {
        generation: u64,
        result: std::result::Result<Channel, TransportError>,
    },
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    ReconnectDue {
        generation: u64,
    },
    HandshakeExpired {
        generation: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
}

/// Handle to one logical broker connection.
///
/// Cloning is cheap; all clones drive the same session. The session task
/// closes the connection and exits once every handle is dropped.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl Session {
    /// Create a session with default configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<T: Transport>(transport: T) -> (Self, SessionEvents) {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a session with explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_config<T: Transport>(transport: T, config: SessionConfig) -> (Self, SessionEvents) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);

        let gateway = PublishGateway::new(config.publish_buffer, &config.frame);
        let driver = Driver {
            transport: Arc::new(transport),
            config,
            state: SessionState::Disconnected,
            state_tx,
            events,
            internal,
            registry: SubscriptionRegistry::new(),
            gateway,
            target: None,
            generation: 0,
            link: None,
            tasks: Vec::new(),
            pending_open: None,
            attempts: 0,
            reconnecting: false,
        };
        tokio::spawn(driver.run(command_rx, internal_rx));

        (Self { commands, state }, SessionEvents::new(event_rx))
    }

    /// Connect to `endpoint` and wait for the broker's CONNECTED.
    ///
    /// Only valid while DISCONNECTED. The endpoint and policy are kept for
    /// later reconnects.
    pub async fn open(&self, endpoint: &str, policy: ReconnectPolicy) -> Result<()> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.open_endpoint(endpoint, policy).await
    }

    pub async fn open_endpoint(&self, endpoint: Endpoint, policy: ReconnectPolicy) -> Result<()> {
        self.request(|reply| Command::Open {
            endpoint,
            policy,
            reply,
        })
        .await
    }

    /// Send DISCONNECT if connected, drop the connection and cancel any
    /// pending reconnect. A no-op when already DISCONNECTED.
    ///
    /// Returns without waiting for the broker to acknowledge.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Register `consumer` for `destination`.
    ///
    /// Always accepted; the SUBSCRIBE frame is sent now if connected and on
    /// every future connect otherwise.
    pub async fn subscribe<C: Consumer>(
        &self,
        destination: impl Into<String>,
        consumer: C,
    ) -> Result<SubscriptionId> {
        self.subscribe_with_headers(destination, Headers::new(), consumer)
            .await
    }

    /// Like [`subscribe`](Self::subscribe), adding extra SUBSCRIBE headers.
    pub async fn subscribe_with_headers<C: Consumer>(
        &self,
        destination: impl Into<String>,
        headers: Headers,
        consumer: C,
    ) -> Result<SubscriptionId> {
        let destination = destination.into();
        let consumer: Box<dyn Consumer> = Box::new(consumer);
        self.request(|reply| Command::Subscribe {
            destination,
            headers,
            consumer,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, id: &SubscriptionId) -> Result<()> {
        let id = id.clone();
        self.request(|reply| Command::Unsubscribe { id, reply })
            .await
    }

    /// Publish `body` to `destination`.
    pub async fn publish(
        &self,
        destination: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<()> {
        self.publish_message(OutboundMessage::new(destination, body))
            .await
    }

    /// Publish `value` serialized as JSON.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        destination: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        self.publish_message(OutboundMessage::json(destination, value)?)
            .await
    }

    pub async fn publish_message(&self, message: OutboundMessage) -> Result<()> {
        self.request(|reply| Command::Publish { message, reply })
            .await
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reports `target`.
    ///
    /// Only the latest state is observed, so a state held for a very short
    /// time can be missed.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Shutdown)
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Target {
    endpoint: Endpoint,
    policy: ReconnectPolicy,
}

/// The live connection of the current generation.
struct Link {
    sender: ChannelSender,
    frames: FrameBuffer,
    heartbeat: NegotiatedHeartbeat,
    heartbeat_tick: Duration,
    last_read: Instant,
    last_write: Instant,
}

struct Driver {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    registry: SubscriptionRegistry,
    gateway: PublishGateway,
    target: Option<Target>,
    /// Bumped whenever the connection, or a timer guarding it, is replaced.
    generation: u64,
    link: Option<Link>,
    /// Helper tasks belonging to the current generation.
    tasks: Vec<JoinHandle<()>>,
    pending_open: Option<Reply<()>>,
    /// Consecutive failed reconnect attempts.
    attempts: u32,
    /// Whether the current connect attempt follows a lost connection.
    reconnecting: bool,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }
        debug!("all session handles dropped");
        self.close();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open {
                endpoint,
                policy,
                reply,
            } => {
                if self.state != SessionState::Disconnected {
                    let _ = reply.send(Err(SessionError::InvalidState {
                        operation: "open",
                        state: self.state,
                    }));
                    return;
                }
                info!(endpoint = %endpoint, transport = self.transport.name(), "opening session");
                self.target = Some(Target { endpoint, policy });
                self.attempts = 0;
                self.reconnecting = false;
                self.pending_open = Some(reply);
                self.start_connect();
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(Ok(()));
            }
            Command::Subscribe {
                destination,
                headers,
                consumer,
                reply,
            } => {
                let _ = reply.send(self.subscribe(destination, headers, consumer));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.unsubscribe(&id));
            }
            Command::Publish { message, reply } => {
                let _ = reply.send(self.publish(message));
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Opened { generation, result } if generation == self.generation => {
                self.on_opened(result)
            }
            Internal::Channel { generation, event } if generation == self.generation => {
                self.on_channel_event(event)
            }
            Internal::ReconnectDue { generation } if generation == self.generation => {
                if self.state == SessionState::Reconnecting {
                    self.start_connect();
                }
            }
            Internal::HandshakeExpired { generation } if generation == self.generation => {
                if self.state == SessionState::Connecting {
                    let timeout = self.config.handshake_timeout.unwrap_or_default();
                    self.connect_failed(SessionError::HandshakeTimeout(timeout));
                }
            }
            Internal::HeartbeatTick { generation } if generation == self.generation => {
                self.on_heartbeat_tick()
            }
            _ => trace!("ignoring event from a replaced connection"),
        }
    }

    fn subscribe(
        &mut self,
        destination: String,
        headers: Headers,
        consumer: Box<dyn Consumer>,
    ) -> Result<SubscriptionId> {
        if destination.trim().is_empty() {
            return Err(SessionError::InvalidDestination(
                "destination must not be empty".to_string(),
            ));
        }
        if headers.keys().any(String::is_empty) {
            return Err(SessionError::InvalidHeader {
                name: String::new(),
                reason: "header name must not be empty".to_string(),
            });
        }

        let subscription = self.registry.register(destination, headers, consumer);
        let id = subscription.id().clone();
        let frame = subscription.subscribe_frame();
        debug!(id = %id, destination = frame.destination().unwrap_or_default(), "subscription registered");

        if self.state.is_connected() {
            self.transmit(&frame);
        }
        Ok(id)
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<()> {
        let removed = self
            .registry
            .remove(id)
            .ok_or_else(|| SessionError::UnknownSubscription(id.clone()))?;
        debug!(id = %id, destination = removed.destination(), "subscription removed");

        if self.state.is_connected() {
            self.transmit(&Frame::unsubscribe(id.as_str()));
        }
        Ok(())
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<()> {
        let frame = self.gateway.prepare(message)?;
        if self.state.is_connected() && self.transmit(&frame) {
            return Ok(());
        }

        match self.gateway.enqueue(frame, self.state)? {
            Enqueued::Buffered => {
                trace!(pending = self.gateway.pending(), "publish buffered");
            }
            Enqueued::Evicted(evicted) => {
                self.emit(SessionEvent::PublishDropped {
                    destination: evicted.destination().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(())
    }

    fn start_connect(&mut self) {
        let Some(endpoint) = self.target.as_ref().map(|t| t.endpoint.clone()) else {
            return;
        };
        self.teardown();
        let generation = self.next_generation();
        self.set_state(SessionState::Connecting);
        debug!(endpoint = %endpoint, generation, "connecting");

        let open = self.transport.open(&endpoint);
        let internal = self.internal.clone();
        self.tasks.push(tokio::spawn(async move {
            let result = open.await;
            let _ = internal.send(Internal::Opened { generation, result });
        }));

        if let Some(timeout) = self.config.handshake_timeout {
            self.schedule(timeout, Internal::HandshakeExpired { generation });
        }
    }

    fn on_opened(&mut self, result: std::result::Result<Channel, TransportError>) {
        if self.state != SessionState::Connecting {
            return;
        }
        let channel = match result {
            Ok(channel) => channel,
            Err(err) => {
                self.connect_failed(SessionError::ConnectFailed(err));
                return;
            }
        };

        let generation = self.generation;
        debug!(peer = channel.peer(), "channel open, sending CONNECT");
        let (sender, mut receiver) = channel.into_split();
        let internal = self.internal.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if internal
                    .send(Internal::Channel { generation, event })
                    .is_err()
                {
                    break;
                }
            }
        }));

        let now = Instant::now();
        self.link = Some(Link {
            sender,
            frames: FrameBuffer::new(self.config.frame.clone()),
            heartbeat: NegotiatedHeartbeat::default(),
            heartbeat_tick: Duration::ZERO,
            last_read: now,
            last_write: now,
        });

        let Some(target) = &self.target else {
            return;
        };
        let connect = handshake::connect_frame(&self.config, &target.endpoint);
        if !self.transmit(&connect) {
            self.connect_failed(SessionError::HandshakeFailed(
                "channel closed before CONNECT was sent".to_string(),
            ));
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Data(bytes) => self.on_data(&bytes),
            ChannelEvent::Closed(reason) => {
                debug!(reason = %reason, state = %self.state, "channel closed");
                match self.state {
                    SessionState::Connecting => self.connect_failed(SessionError::HandshakeFailed(
                        format!("channel closed during handshake: {reason}"),
                    )),
                    SessionState::Connected => {
                        self.schedule_reconnect(format!("channel closed: {reason}"))
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_data(&mut self, bytes: &[u8]) {
        let generation = self.generation;
        match self.link.as_mut() {
            Some(link) => {
                link.last_read = Instant::now();
                link.frames.feed(bytes);
            }
            None => return,
        }

        // A handler below may replace the connection; stop as soon as it does.
        while self.generation == generation {
            let next = match self.link.as_mut() {
                Some(link) => link.frames.next_frame(),
                None => return,
            };
            match next {
                Ok(Some(frame)) => self.on_frame(frame),
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "dropping connection after malformed frame");
                    match self.state {
                        SessionState::Connecting => {
                            self.connect_failed(SessionError::MalformedFrame(err))
                        }
                        SessionState::Connected => {
                            self.schedule_reconnect(format!("malformed frame: {err}"))
                        }
                        _ => {}
                    }
                    return;
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        trace!(kind = %frame.kind, "received frame");
        match self.state {
            SessionState::Connecting => {
                match handshake::accept_connected(&frame, &self.config.heartbeat) {
                    Ok(info) => self.on_connected(info),
                    Err(err) => self.connect_failed(err),
                }
            }
            SessionState::Connected => self.dispatch(frame),
            _ => trace!(kind = %frame.kind, "dropping frame outside a connection"),
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        match frame.kind {
            FrameKind::Message => match self.registry.route(&frame) {
                RouteOutcome::Unroutable => {
                    debug!(
                        destination = frame.destination().unwrap_or_default(),
                        subscription = frame.subscription().unwrap_or_default(),
                        "no subscription for message, dropping"
                    );
                    self.emit(SessionEvent::Unroutable {
                        destination: frame.destination().map(str::to_string),
                        subscription: frame.subscription().map(str::to_string),
                    });
                }
                outcome => trace!(?outcome, "message delivered"),
            },
            FrameKind::Error => {
                let detail = ErrorDetail::from_frame(&frame);
                warn!(error = %detail, "broker reported an error");
                self.emit(SessionEvent::Error(detail));
            }
            FrameKind::Receipt => {
                if let Some(id) = frame.header(header::RECEIPT_ID) {
                    self.emit(SessionEvent::Receipt(id.to_string()));
                }
            }
            other => debug!(kind = %other, "ignoring unexpected frame from broker"),
        }
    }

    fn on_connected(&mut self, info: ConnectedInfo) {
        let subscriptions = self.registry.subscribe_frames();
        for frame in &subscriptions {
            self.transmit(frame);
        }
        let buffered = self.gateway.drain();
        for frame in &buffered {
            self.transmit(frame);
        }

        self.attempts = 0;
        self.reconnecting = false;
        self.set_state(SessionState::Connected);
        info!(
            version = %info.version,
            server = info.server.as_deref().unwrap_or("unknown"),
            subscriptions = subscriptions.len(),
            flushed = buffered.len(),
            "session connected"
        );
        self.start_heartbeat(info.heartbeat);

        self.emit(SessionEvent::Connected {
            version: info.version,
            server: info.server,
            session: info.session,
        });
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn start_heartbeat(&mut self, heartbeat: NegotiatedHeartbeat) {
        let Some(shortest) = [heartbeat.outgoing, heartbeat.incoming]
            .into_iter()
            .flatten()
            .min()
        else {
            return;
        };
        let tick = (shortest / 2).max(MIN_HEARTBEAT_TICK);
        if let Some(link) = self.link.as_mut() {
            link.heartbeat = heartbeat;
            link.heartbeat_tick = tick;
        }
        debug!(outgoing = ?heartbeat.outgoing, incoming = ?heartbeat.incoming, "heart-beating");

        let generation = self.generation;
        let internal = self.internal.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if internal.send(Internal::HeartbeatTick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn on_heartbeat_tick(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let now = Instant::now();
        let silent = now.duration_since(link.last_read);
        let idle = now.duration_since(link.last_write);
        let (heartbeat, tick) = (link.heartbeat, link.heartbeat_tick);

        if let Some(incoming) = heartbeat.incoming {
            if silent > incoming * HEARTBEAT_GRACE {
                warn!(silent = ?silent, expected = ?incoming, "broker heart-beat missed");
                self.schedule_reconnect(format!("no data from broker for {silent:?}"));
                return;
            }
        }
        if let Some(outgoing) = heartbeat.outgoing {
            // Write now if waiting another tick would overrun the interval.
            if idle + tick >= outgoing {
                trace!("sending heart-beat");
                self.write(Bytes::from_static(HEARTBEAT_EOL));
            }
        }
    }

    /// A connect attempt failed before CONNECTED.
    fn connect_failed(&mut self, error: SessionError) {
        let retry = self.reconnecting
            || self
                .target
                .as_ref()
                .is_some_and(|t| t.policy.retry_initial_connect);
        if retry {
            warn!(error = %error, "connect attempt failed");
            self.schedule_reconnect(error.to_string());
            return;
        }

        warn!(error = %error, "open failed");
        self.teardown();
        self.next_generation();
        self.set_state(SessionState::Disconnected);
        self.emit(SessionEvent::Disconnected(DisconnectReason::OpenFailed(
            error.to_string(),
        )));
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn schedule_reconnect(&mut self, reason: String) {
        self.teardown();
        self.reconnecting = true;
        let Some(policy) = self.target.as_ref().map(|t| t.policy.clone()) else {
            self.set_state(SessionState::Disconnected);
            return;
        };

        if !policy.allows_attempt(self.attempts) {
            let attempts = self.attempts;
            warn!(attempts, reason = %reason, "giving up reconnecting");
            self.next_generation();
            self.reconnecting = false;
            self.set_state(SessionState::Disconnected);
            self.emit(SessionEvent::Disconnected(
                DisconnectReason::ReconnectExhausted { attempts },
            ));
            if let Some(reply) = self.pending_open.take() {
                let _ = reply.send(Err(SessionError::ReconnectExhausted { attempts }));
            }
            return;
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = policy.delay_for(attempt);
        let generation = self.next_generation();
        self.set_state(SessionState::Reconnecting);
        info!(attempt, delay = ?delay, reason = %reason, "reconnect scheduled");
        self.emit(SessionEvent::Reconnecting {
            attempt,
            delay,
            reason,
        });
        self.schedule(delay, Internal::ReconnectDue { generation });
    }

    fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            trace!("close on a disconnected session");
            return;
        }

        let was_connected = self.state.is_connected();
        self.set_state(SessionState::Disconnecting);
        if was_connected {
            self.transmit(&Frame::disconnect());
        }
        self.teardown();
        self.next_generation();
        self.attempts = 0;
        self.reconnecting = false;
        self.set_state(SessionState::Disconnected);

        self.emit(SessionEvent::Disconnected(DisconnectReason::Closed));
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Err(SessionError::Closed));
        }
    }

    /// Abort the current generation's helpers and close its channel.
    fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.sender.close();
        }
    }

    fn schedule(&mut self, delay: Duration, event: Internal) {
        let internal = self.internal.clone();
        self.tasks.push(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = internal.send(event);
        }));
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn transmit(&mut self, frame: &Frame) -> bool {
        trace!(kind = %frame.kind, destination = frame.destination().unwrap_or_default(), "sending frame");
        self.write(frame.encode())
    }

    fn write(&mut self, bytes: Bytes) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.sender.send(bytes) {
            Ok(()) => {
                link.last_write = Instant::now();
                true
            }
            Err(err) => {
                debug!(error = %err, "channel write failed");
                false
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "session state changed");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
