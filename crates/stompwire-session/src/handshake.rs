//! CONNECT / CONNECTED negotiation.

use std::time::Duration;

use stompwire_frame::{header, Frame, FrameKind};
use stompwire_transport::Endpoint;

use crate::config::{HeartbeatConfig, SessionConfig};
use crate::error::{Result, SessionError};
use crate::event::ErrorDetail;

/// Protocol versions offered in CONNECT, most preferred first.
pub const ACCEPT_VERSIONS: &[&str] = &["1.2", "1.1", "1.0"];

/// Version assumed when CONNECTED omits the `version` header.
const LEGACY_VERSION: &str = "1.0";

const MAX_VERSION_LEN: usize = 16;

/// Heart-beat intervals in effect for one connection. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartbeat {
    /// How often we must write something.
    pub outgoing: Option<Duration>,
    /// How often the broker promised to write something.
    pub incoming: Option<Duration>,
}

impl NegotiatedHeartbeat {
    pub fn is_disabled(&self) -> bool {
        self.outgoing.is_none() && self.incoming.is_none()
    }
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfo {
    pub version: String,
    pub server: Option<String>,
    pub session: Option<String>,
    pub heartbeat: NegotiatedHeartbeat,
}

/// Build the CONNECT frame for `endpoint`.
pub fn connect_frame(config: &SessionConfig, endpoint: &Endpoint) -> Frame {
    let host = config
        .host
        .clone()
        .unwrap_or_else(|| endpoint.host().to_string());

    let mut frame = Frame::new(FrameKind::Connect)
        .with_header(header::ACCEPT_VERSION, ACCEPT_VERSIONS.join(","))
        .with_header(header::HOST, host)
        .with_header(header::HEART_BEAT, config.heartbeat.header_value());
    if let Some(login) = &config.login {
        frame = frame.with_header(header::LOGIN, login.clone());
    }
    if let Some(passcode) = &config.passcode {
        frame = frame.with_header(header::PASSCODE, passcode.clone());
    }
    frame
}

/// Interpret the broker's answer to CONNECT.
pub fn accept_connected(frame: &Frame, heartbeat: &HeartbeatConfig) -> Result<ConnectedInfo> {
    match frame.kind {
        FrameKind::Connected => {}
        FrameKind::Error => return Err(SessionError::Protocol(ErrorDetail::from_frame(frame))),
        other => {
            return Err(SessionError::HandshakeFailed(format!(
                "expected CONNECTED, got {other}"
            )))
        }
    }

    let version = frame
        .header(header::VERSION)
        .unwrap_or(LEGACY_VERSION)
        .to_string();
    validate_version(&version)?;
    if !ACCEPT_VERSIONS.contains(&version.as_str()) {
        return Err(SessionError::HandshakeFailed(format!(
            "unsupported protocol version '{version}' (offered {})",
            ACCEPT_VERSIONS.join(",")
        )));
    }

    let server_heartbeat = match frame.header(header::HEART_BEAT) {
        Some(value) => parse_heartbeat(value)?,
        None => (0, 0),
    };

    Ok(ConnectedInfo {
        version,
        server: frame.header(header::SERVER).map(str::to_string),
        session: frame.header(header::SESSION).map(str::to_string),
        heartbeat: negotiate(heartbeat, server_heartbeat),
    })
}

/// Parse a `heart-beat` header value (`"sx,sy"` in milliseconds).
pub fn parse_heartbeat(value: &str) -> Result<(u64, u64)> {
    let invalid = || SessionError::HandshakeFailed(format!("invalid heart-beat header '{value}'"));
    let (send, recv) = value.split_once(',').ok_or_else(invalid)?;
    let send = send.trim().parse::<u64>().map_err(|_| invalid())?;
    let recv = recv.trim().parse::<u64>().map_err(|_| invalid())?;
    Ok((send, recv))
}

/// Combine our offer with the broker's `(sx, sy)`.
///
/// Each direction is off if either side declines it, else the slower of the two.
pub fn negotiate(client: &HeartbeatConfig, server: (u64, u64)) -> NegotiatedHeartbeat {
    let (sx, sy) = server;
    let cx = duration_millis(client.outgoing);
    let cy = duration_millis(client.incoming);

    let pick = |ours: u64, theirs: u64| {
        (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
    };

    NegotiatedHeartbeat {
        outgoing: pick(cx, sy),
        incoming: pick(cy, sx),
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid version '{version}'"
        )));
    }
    let (major, minor) = version.split_once('.').ok_or_else(|| {
        SessionError::HandshakeFailed(format!("invalid version '{version}' (expected major.minor)"))
    })?;
    let numeric = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !numeric(major) || !numeric(minor) {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid version '{version}' (expected major.minor)"
        )));
    }
    Ok(())
}
