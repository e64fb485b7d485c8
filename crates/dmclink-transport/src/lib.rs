//! TCP transport for motion controller channels.
//!
//! The controller exposes its command and message channels as plain TCP
//! connections (conventionally port 23). This is the lowest layer of dmclink:
//! it parses endpoints, opens connections with a bounded connect time, and
//! hands back a [`ControllerStream`]. Everything else builds on top of it.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{TcpConnector, DEFAULT_CONNECT_TIMEOUT};
pub use traits::{ControllerStream, Endpoint, DEFAULT_PORT};
