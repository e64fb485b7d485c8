use crate::cmd::{connect, ArraysArgs, ConnectionArgs};
use crate::exit::{controller_error, CliResult, SUCCESS};
use crate::output::{print_lines, OutputFormat};

pub async fn run(
    _args: ArraysArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let controller = connect(connection).await?;
    let result = controller.list_arrays().await;
    controller.disconnect().await;

    let arrays = result.map_err(|err| controller_error("listing arrays failed", err))?;
    print_lines("ARRAY", &arrays, format);
    Ok(SUCCESS)
}
