use std::fmt;
use std::time::Duration;

use stompwire_frame::FrameConfig;

/// Delay between reconnect attempts when none is configured.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Heart-beat intervals offered to the broker in CONNECT.
///
/// A zero interval means "cannot send" (outgoing) or "does not want to
/// receive" (incoming). The effective intervals are negotiated against the
/// broker's CONNECTED header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartbeatConfig {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Render as the `heart-beat` header value, in milliseconds.
    pub fn header_value(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT, DEFAULT_HEARTBEAT)
    }
}

/// How the reconnect delay grows between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    Fixed,
    /// Multiply the delay by `factor` per attempt, capped at `max_delay`.
    Exponential { factor: u32, max_delay: Duration },
}

/// Reconnect behaviour supplied to `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub delay: Duration,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    /// Retry a failing first open instead of reporting it to the caller.
    pub retry_initial_connect: bool,
}

impl ReconnectPolicy {
    /// Fixed delay, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Never reconnect: the first transport failure ends the session.
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_initial_connect(mut self, retry: bool) -> Self {
        self.retry_initial_connect = retry;
        self
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max_delay } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
                self.delay
                    .checked_mul(multiplier)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }

    /// Whether another attempt is allowed after `attempts` consecutive failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
            backoff: Backoff::Fixed,
            retry_initial_connect: false,
        }
    }
}

/// What to do when a publish arrives and the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Fail the new publish with `BufferFull`.
    #[default]
    RejectNewest,
    /// Evict the oldest buffered message and report it as dropped.
    DropOldest,
}

/// Bounded buffer for messages published while not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishBuffer {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl PublishBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

/// Session configuration.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Decoder limits for inbound frames and the size limit for publishes.
    pub frame: FrameConfig,
    pub heartbeat: HeartbeatConfig,
    /// Maximum time from starting a connect attempt to receiving CONNECTED.
    /// `None` waits as long as the transport does.
    pub handshake_timeout: Option<Duration>,
    /// Virtual host sent in CONNECT. Defaults to the endpoint host.
    pub host: Option<String>,
    pub login: Option<String>,
    /// Sent in plaintext inside CONNECT; never logged.
    pub passcode: Option<String>,
    /// Buffer publishes while not connected. `None` rejects them.
    pub publish_buffer: Option<PublishBuffer>,
}

impl SessionConfig {
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn with_publish_buffer(mut self, buffer: PublishBuffer) -> Self {
        self.publish_buffer = Some(buffer);
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SessionConfig");
        dbg.field("frame", &self.frame)
            .field("heartbeat", &self.heartbeat)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("host", &self.host)
            .field("login", &self.login);
        if let Some(passcode) = &self.passcode {
            dbg.field(
                "passcode",
                &format_args!("<redacted:{} bytes>", passcode.len()),
            );
        } else {
            dbg.field("passcode", &Option::<String>::None);
        }
        dbg.field("publish_buffer", &self.publish_buffer).finish()
    }
}
