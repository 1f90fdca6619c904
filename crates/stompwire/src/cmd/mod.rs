use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use stompwire_session::{
    HeartbeatConfig, PublishBuffer, ReconnectPolicy, Session, SessionConfig, SessionEvents,
};
use stompwire_transport::DefaultTransport;
use tracing::info;

use crate::exit::{session_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod chat;
pub mod publish;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Subscribe to a destination and print received messages.
    Subscribe(SubscribeArgs),
    /// Publish a single message.
    Publish(PublishArgs),
    /// Interactive chat: stdin lines are published, topic messages printed.
    Chat(ChatArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Subscribe(args) => subscribe::run(args, format).await,
        Command::Publish(args) => publish::run(args, format).await,
        Command::Chat(args) => chat::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Connection flags shared by every networked command.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Delay between reconnect attempts (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", env = "STOMPWIRE_RECONNECT_DELAY")]
    pub reconnect_delay: String,
    /// Give up after this many consecutive failed reconnects. Default: retry forever.
    #[arg(long, env = "STOMPWIRE_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,
    /// Fail if CONNECTED does not arrive in time (e.g. 10s). Default: no timeout.
    #[arg(long, env = "STOMPWIRE_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout: Option<String>,
    /// Virtual host sent in CONNECT. Default: the endpoint host.
    #[arg(long, env = "STOMPWIRE_HOST")]
    pub host: Option<String>,
    /// Broker login.
    #[arg(long, env = "STOMPWIRE_LOGIN")]
    pub login: Option<String>,
    /// Broker passcode.
    #[arg(long, env = "STOMPWIRE_PASSCODE", hide_env_values = true)]
    pub passcode: Option<String>,
    /// Heart-beat offer as `outgoing,incoming` milliseconds.
    #[arg(long, default_value = "10000,10000", env = "STOMPWIRE_HEARTBEAT")]
    pub heartbeat: String,
}

impl ConnectArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let mut config = SessionConfig::default().with_heartbeat(parse_heartbeat(&self.heartbeat)?);
        if let Some(timeout) = &self.handshake_timeout {
            config = config.with_handshake_timeout(parse_duration(timeout)?);
        }
        config.host = self.host.clone();
        config.login = self.login.clone();
        config.passcode = self.passcode.clone();
        Ok(config)
    }

    pub fn reconnect_policy(&self) -> CliResult<ReconnectPolicy> {
        let mut policy = ReconnectPolicy::fixed(parse_duration(&self.reconnect_delay)?);
        if let Some(max) = self.max_attempts {
            policy = policy.with_max_attempts(max);
        }
        Ok(policy)
    }
}

/// A session over the scheme-dispatching transport, not yet opened.
pub fn new_session(
    connect: &ConnectArgs,
    buffer: Option<PublishBuffer>,
) -> CliResult<(Session, SessionEvents)> {
    let mut config = connect.session_config()?;
    config.publish_buffer = buffer;
    Ok(Session::with_config(DefaultTransport, config))
}

pub async fn open_session(
    session: &Session,
    endpoint: &str,
    connect: &ConnectArgs,
) -> CliResult<()> {
    let policy = connect.reconnect_policy()?;
    session
        .open(endpoint, policy)
        .await
        .map_err(|err| session_error("connect failed", err))?;
    info!(endpoint, "connected");
    Ok(())
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Broker endpoint (tcp://host:port, ws://host:port/path, unix:///path).
    pub endpoint: String,
    /// Destination to subscribe to.
    #[arg(long, short = 'd')]
    pub destination: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Extra SUBSCRIBE header as name=value (repeatable).
    #[arg(long, value_name = "NAME=VALUE")]
    pub header: Vec<String>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Broker endpoint (tcp://host:port, ws://host:port/path, unix:///path).
    pub endpoint: String,
    /// Destination to publish to.
    #[arg(long, short = 'd')]
    pub destination: String,
    /// JSON payload; sets content-type: application/json.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Extra SEND header as name=value (repeatable).
    #[arg(long, value_name = "NAME=VALUE")]
    pub header: Vec<String>,
    /// How long to wait for the broker's receipt (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub receipt_timeout: String,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Broker endpoint (tcp://host:port, ws://host:port/path, unix:///path).
    /// A SockJS-enabled `/chat` endpoint is reached at ws://host:8080/chat/websocket.
    pub endpoint: String,
    /// Name attached to every message.
    #[arg(long, short = 'u', env = "STOMPWIRE_USER")]
    pub user: String,
    /// Destination chat lines are published to.
    #[arg(long, default_value = "/app/chat")]
    pub send_to: String,
    /// Topic chat messages are received from.
    #[arg(long, default_value = "/topic/messages")]
    pub topic: String,
    /// Lines typed while disconnected are held until the next connect.
    #[arg(long, default_value = "64")]
    pub buffer: usize,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Parse `outgoing,incoming` heart-beat milliseconds.
pub fn parse_heartbeat(input: &str) -> CliResult<HeartbeatConfig> {
    let invalid = || {
        CliError::new(
            USAGE,
            format!("invalid heartbeat '{input}' (expected OUT,IN in milliseconds)"),
        )
    };
    let (outgoing, incoming) = input.split_once(',').ok_or_else(invalid)?;
    let outgoing: u64 = outgoing.trim().parse().map_err(|_| invalid())?;
    let incoming: u64 = incoming.trim().parse().map_err(|_| invalid())?;
    Ok(HeartbeatConfig::new(
        Duration::from_millis(outgoing),
        Duration::from_millis(incoming),
    ))
}

/// Parse repeated `name=value` flags.
pub fn parse_headers(pairs: &[String]) -> CliResult<stompwire_frame::Headers> {
    let mut headers = stompwire_frame::Headers::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| {
                CliError::new(USAGE, format!("invalid header '{pair}' (expected NAME=VALUE)"))
            })?;
        headers.insert(name.trim().to_string(), value.to_string());
    }
    Ok(headers)
}
