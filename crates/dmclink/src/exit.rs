use std::fmt;
use std::io;

use dmclink_controller::ControllerError;
use dmclink_frame::FrameError;
use dmclink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The controller answered `?`.
pub const COMMAND_REJECTED: i32 = 70;
/// A subroutine reported failure on the message channel.
pub const REMOTE_ERROR: i32 = 71;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { endpoint, source } => CliError::new(
            TRANSPORT_ERROR,
            format!("{context}: cannot reach {endpoint}: {source}"),
        ),
        TransportError::ConnectTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::InvalidEndpoint { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::LineTooLong { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn controller_error(context: &str, err: ControllerError) -> CliError {
    match err {
        ControllerError::Transport(err) => transport_error(context, err),
        ControllerError::Frame(err) => frame_error(context, err),
        ControllerError::Connection { .. } | ControllerError::HandshakeFailed(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ControllerError::Command { .. } => {
            CliError::new(COMMAND_REJECTED, format!("{context}: {err}"))
        }
        ControllerError::Remote { .. } => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        ControllerError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ControllerError::Protocol(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ControllerError::InvalidPattern { .. }
        | ControllerError::InvalidInput(_)
        | ControllerError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}
