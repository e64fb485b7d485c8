use crate::cmd::{connect, ConnectionArgs, StatusArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_status, OutputFormat};

pub async fn run(
    _args: StatusArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let controller = connect(connection).await?;
    print_status(&controller.status(), format);
    controller.disconnect().await;
    Ok(SUCCESS)
}
