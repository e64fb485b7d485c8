use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ControllerStream, Endpoint};

/// Default bound on a single TCP connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens TCP connections to a controller.
///
/// Each call to [`connect`](Self::connect) produces a fresh socket with
/// `TCP_NODELAY` set, since every request is a short ASCII line.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpConnector {
    /// Create a connector with an explicit connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Configured connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to `endpoint`, failing after the configured timeout.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<ControllerStream> {
        let authority = endpoint.authority();
        let attempt = TcpStream::connect(authority.as_str());
        let stream = match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    endpoint: authority,
                    source,
                })
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    endpoint: authority,
                    timeout: self.connect_timeout,
                })
            }
        };

        stream.set_nodelay(true)?;
        debug!(%endpoint, "connected to controller endpoint");
        Ok(ControllerStream::from_tcp(stream, endpoint.clone()))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
