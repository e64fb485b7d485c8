use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use dmclink_controller::{Controller, ControllerConfig};

use crate::exit::{controller_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod arrays;
pub mod download;
pub mod exec;
pub mod send;
pub mod status;
pub mod upload;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send commands on the command channel and print their output.
    Send(SendArgs),
    /// Run a controller subroutine and wait for its completion message.
    Exec(ExecArgs),
    /// Read an array from the controller.
    Upload(UploadArgs),
    /// Write values into a controller array.
    Download(DownloadArgs),
    /// List the arrays defined on the controller.
    Arrays(ArraysArgs),
    /// Print unsolicited messages as they arrive.
    Watch(WatchArgs),
    /// Connect and print the state of both channels.
    Status(StatusArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(
    command: Command,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, connection, format).await,
        Command::Exec(args) => exec::run(args, connection, format).await,
        Command::Upload(args) => upload::run(args, connection, format).await,
        Command::Download(args) => download::run(args, connection, format).await,
        Command::Arrays(args) => arrays::run(args, connection, format).await,
        Command::Watch(args) => watch::run(args, connection, format).await,
        Command::Status(args) => status::run(args, connection, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Controller host name or address.
    #[arg(long, env = "DMCLINK_HOST", global = true)]
    pub host: Option<String>,
    /// Command channel port.
    #[arg(long, env = "DMCLINK_PORT", global = true)]
    pub port: Option<u16>,
    /// Message channel port, when it differs from the command port.
    #[arg(long, global = true)]
    pub message_port: Option<u16>,
    /// JSON configuration file; flags override its values.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
    /// Skip the message channel handshake.
    #[arg(long, global = true)]
    pub no_handshake: bool,
}

impl ConnectionArgs {
    pub fn to_config(&self) -> CliResult<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .map_err(|err| controller_error("config load failed", err))?,
            None => ControllerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.message_port.is_some() {
            config.message_port = self.message_port;
        }
        if self.no_handshake {
            config.handshake_command = None;
        }
        config
            .validate()
            .map_err(|err| controller_error("invalid configuration", err))?;
        Ok(config)
    }
}

/// Build a controller from the connection flags and bring both channels up.
pub async fn connect(connection: &ConnectionArgs) -> CliResult<Controller> {
    let config = connection.to_config()?;
    let controller =
        Controller::new(config).map_err(|err| controller_error("invalid configuration", err))?;
    controller
        .connect()
        .await
        .map_err(|err| controller_error("connect failed", err))?;
    Ok(controller)
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Commands to send, in order. Stops at the first rejected command.
    #[arg(required = true)]
    pub commands: Vec<String>,
    /// Per-command timeout (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Subroutine label, without the leading '#'.
    pub name: String,
    /// Completion message. Wrap in slashes for a regular expression.
    #[arg(long)]
    pub until: String,
    /// Message that marks the subroutine as failed.
    #[arg(long)]
    pub error: Option<String>,
    /// Inactivity timeout (e.g. 60s).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Include the messages received while the subroutine ran.
    #[arg(long)]
    pub transcript: bool,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Array name.
    pub name: String,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Array name.
    pub name: String,
    /// Values to write, comma-separated.
    #[arg(required = true, value_delimiter = ',', allow_negative_numbers = true)]
    pub values: Vec<f64>,
}

#[derive(Args, Debug, Default)]
pub struct ArraysArgs {}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only print messages matching this pattern. Wrap in slashes for a regular expression.
    #[arg(long)]
    pub pattern: Option<String>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

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

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = ConnectionArgs {
            host: Some("10.0.0.5".into()),
            port: Some(2323),
            message_port: Some(2324),
            no_handshake: true,
            ..ConnectionArgs::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 2323);
        assert_eq!(config.message_port, Some(2324));
        assert_eq!(config.handshake_command, None);
    }

    #[test]
    fn missing_config_file_is_usage_error() {
        let args = ConnectionArgs {
            config: Some(PathBuf::from("/nonexistent/dmclink.json")),
            ..ConnectionArgs::default()
        };
        assert_eq!(args.to_config().unwrap_err().code, USAGE);
    }
}
