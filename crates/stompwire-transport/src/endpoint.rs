use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Transport family selected by an endpoint's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Unix,
    Ws,
    Wss,
    Memory,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
            Scheme::Memory => "memory",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" | "stomp" => Some(Scheme::Tcp),
            "unix" => Some(Scheme::Unix),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            "memory" => Some(Scheme::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed broker address.
///
/// Accepted forms:
/// - `host:port` (implies `tcp://`)
/// - `tcp://host:port`
/// - `unix:///path/to/broker.sock`
/// - `ws://host[:port]/path`, `wss://host[:port]/path`
/// - `memory://name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    authority: String,
    path: String,
    raw: String,
}

impl Endpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(invalid(input, "endpoint must not be empty"));
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = Scheme::parse(scheme)
                    .ok_or_else(|| TransportError::UnsupportedScheme(scheme.to_string()))?;
                (scheme, rest)
            }
            None => (Scheme::Tcp, raw),
        };

        let (authority, path) = match scheme {
            Scheme::Unix => {
                if rest.is_empty() {
                    return Err(invalid(input, "unix endpoint requires a socket path"));
                }
                (String::new(), rest.to_string())
            }
            _ => match rest.find('/') {
                Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
                None => (rest.to_string(), String::new()),
            },
        };

        match scheme {
            Scheme::Tcp => {
                validate_host_port(input, &authority, true)?;
                if !path.is_empty() {
                    return Err(invalid(input, "tcp endpoint must not carry a path"));
                }
            }
            Scheme::Ws | Scheme::Wss => validate_host_port(input, &authority, false)?,
            Scheme::Memory => {
                if authority.is_empty() {
                    return Err(invalid(input, "memory endpoint requires a name"));
                }
            }
            Scheme::Unix => {}
        }

        let raw = match scheme {
            Scheme::Tcp if !raw.contains("://") => format!("tcp://{raw}"),
            _ => raw.to_string(),
        };

        Ok(Self {
            scheme,
            authority,
            path,
            raw,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `host:port` for network schemes, the name for `memory://`, empty for Unix sockets.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Path component (the socket path for `unix://`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host name suitable for the STOMP `host` header.
    pub fn host(&self) -> &str {
        match self.scheme {
            Scheme::Unix => "localhost",
            Scheme::Memory => &self.authority,
            _ => split_host(&self.authority),
        }
    }

    /// The normalized endpoint string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = TransportError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

fn invalid(endpoint: &str, reason: &str) -> TransportError {
    TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

fn split_host(authority: &str) -> &str {
    // Bracketed IPv6 literal: [::1]:61613
    if let Some(stripped) = authority.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            return &stripped[..end];
        }
    }
    match authority.rsplit_once(':') {
        Some((host, _)) => host,
        None => authority,
    }
}

fn validate_host_port(input: &str, authority: &str, port_required: bool) -> Result<()> {
    if authority.is_empty() {
        return Err(invalid(input, "missing host"));
    }
    let host = split_host(authority);
    if host.is_empty() {
        return Err(invalid(input, "missing host"));
    }
    let port = authority
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(_, tail)| tail.strip_prefix(':'))
        .unwrap_or_else(|| authority.rsplit_once(':').map(|(_, port)| port));

    match port {
        Some(port) => {
            port.parse::<u16>()
                .map_err(|_| invalid(input, "port must be a number in 0..=65535"))?;
        }
        None if port_required => return Err(invalid(input, "missing port")),
        None => {}
    }
    Ok(())
}
