/// Errors that can occur while framing controller traffic.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A line grew past the configured maximum without a boundary.
    #[error("line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the controller.
    #[error("connection closed")]
    ConnectionClosed,

    /// A channel name did not match a known channel.
    #[error("unknown channel '{0}' (expected 'commands' or 'messages')")]
    UnknownChannel(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
