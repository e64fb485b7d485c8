use crate::cmd::{connect, parse_optional_duration, ConnectionArgs, SendArgs};
use crate::exit::{controller_error, CliResult, SUCCESS};
use crate::output::{print_response, OutputFormat};

pub async fn run(
    args: SendArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let timeout = parse_optional_duration(args.timeout.as_deref())?;
    let controller = connect(connection).await?;

    let mut outcome = Ok(SUCCESS);
    for command in &args.commands {
        let sent = match timeout {
            Some(timeout) => controller.send_command_with_timeout(command, timeout).await,
            None => controller.send_command(command).await,
        };
        match sent {
            Ok(response) => print_response(&response, format),
            Err(err) => {
                outcome = Err(controller_error("send failed", err));
                break;
            }
        }
    }

    controller.disconnect().await;
    outcome
}
