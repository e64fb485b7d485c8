use tracing::info;

use crate::cmd::{connect, ConnectionArgs, DownloadArgs};
use crate::exit::{controller_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(
    args: DownloadArgs,
    connection: &ConnectionArgs,
    _format: OutputFormat,
) -> CliResult<i32> {
    let controller = connect(connection).await?;
    let result = controller.download_array(&args.name, &args.values).await;
    controller.disconnect().await;

    result.map_err(|err| controller_error("download failed", err))?;
    info!(array = %args.name, count = args.values.len(), "array downloaded");
    Ok(SUCCESS)
}
