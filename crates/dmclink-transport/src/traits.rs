use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{Result, TransportError};

/// Default TCP port of the controller's Telnet-style interface.
pub const DEFAULT_PORT: u16 = 23;

/// A controller address: host name or IP plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// Parse `host`, `host:port`, or `[v6]:port`. A bare host gets [`DEFAULT_PORT`].
    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty host"));
        }

        if let Ok(addr) = trimmed.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(invalid("unexpected text after ']'")),
            };
            return Ok(Self::new(host, port));
        }

        match trimmed.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Ok(Self::new(trimmed, DEFAULT_PORT)),
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(invalid("empty host"));
                }
                let port = port.parse().map_err(|_| invalid("invalid port"))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(trimmed, DEFAULT_PORT)),
        }
    }
}

/// A connected controller stream.
///
/// Owns exactly one TCP socket. Channels split it into read and write halves
/// and discard both on reconnect; a stream is never reused.
pub struct ControllerStream {
    inner: TcpStream,
    endpoint: Endpoint,
}

impl ControllerStream {
    pub(crate) fn from_tcp(inner: TcpStream, endpoint: Endpoint) -> Self {
        Self { inner, endpoint }
    }

    /// The endpoint this stream was opened against.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// Split into owned halves for a reader task and a writer.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.inner.into_split()
    }
}

impl fmt::Debug for ControllerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerStream")
            .field("type", &"tcp")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
