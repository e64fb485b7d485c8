use crate::cmd::{connect, ConnectionArgs, UploadArgs};
use crate::exit::{controller_error, CliResult, SUCCESS};
use crate::output::{print_values, OutputFormat};

pub async fn run(
    args: UploadArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let controller = connect(connection).await?;
    let result = controller.upload_array(&args.name).await;
    controller.disconnect().await;

    let values = result.map_err(|err| controller_error("upload failed", err))?;
    print_values(&args.name, &values, format);
    Ok(SUCCESS)
}
