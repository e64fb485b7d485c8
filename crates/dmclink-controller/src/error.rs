use std::time::Duration;

use dmclink_frame::ChannelKind;

/// Errors that can occur in controller operations.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dmclink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] dmclink_frame::FrameError),

    /// A channel is not connected, or was lost while an operation waited on it.
    #[error("{channel} channel: {reason}")]
    Connection {
        channel: ChannelKind,
        reason: String,
    },

    /// The controller answered `?`; `detail` is its own explanation.
    #[error("command '{command}' rejected: {detail}")]
    Command { command: String, detail: String },

    /// No qualifying response arrived in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A subroutine's error pattern matched.
    #[error("subroutine '{subroutine}' failed: {message}")]
    Remote { subroutine: String, message: String },

    /// Malformed or unparseable content from the controller.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Post-connect channel configuration failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A watch pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Caller-supplied input cannot be put on the wire.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    pub(crate) fn connection(channel: ChannelKind, reason: impl Into<String>) -> Self {
        Self::Connection {
            channel,
            reason: reason.into(),
        }
    }

    /// True for errors that end in a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
