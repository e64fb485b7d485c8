mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, ConnectionArgs};
use crate::exit::{CliError, INTERNAL};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dmclink", version, about = "Motion controller client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
        .and_then(|runtime| runtime.block_on(cmd::run(cli.command, &cli.connection, format)));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "dmclink",
            "--host",
            "10.0.0.5",
            "send",
            "SH",
            "BG",
            "--timeout",
            "2s",
        ])
        .expect("send args should parse");

        assert_eq!(cli.connection.host.as_deref(), Some("10.0.0.5"));
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.commands, vec!["SH", "BG"]);
                assert_eq!(args.timeout.as_deref(), Some("2s"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_exec_with_patterns() {
        let cli = Cli::try_parse_from([
            "dmclink",
            "exec",
            "Startup",
            "--until",
            "/^End:Startup$/",
            "--error",
            "Error:",
        ])
        .expect("exec args should parse");
        assert!(matches!(cli.command, Command::Exec(_)));
    }

    #[test]
    fn download_requires_values() {
        let err = Cli::try_parse_from(["dmclink", "download", "order"])
            .expect_err("values are required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn connection_args_are_global() {
        let cli = Cli::try_parse_from(["dmclink", "status", "--port", "2323"])
            .expect("global args should parse after the subcommand");
        assert_eq!(cli.connection.port, Some(2323));
    }
}
