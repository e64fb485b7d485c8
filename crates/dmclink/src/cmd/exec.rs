use dmclink_controller::{Pattern, Subroutine};

use crate::cmd::{connect, parse_optional_duration, ConnectionArgs, ExecArgs};
use crate::exit::{controller_error, CliResult, SUCCESS};
use crate::output::{print_execution, OutputFormat};

pub async fn run(
    args: ExecArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let subroutine = subroutine(&args)?;
    let controller = connect(connection).await?;

    let result = controller.execute(&subroutine).await;
    controller.disconnect().await;

    let execution = result.map_err(|err| controller_error("subroutine failed", err))?;
    print_execution(&execution, format);
    Ok(SUCCESS)
}

fn subroutine(args: &ExecArgs) -> CliResult<Subroutine> {
    let name = args.name.trim_start_matches('#');
    let until = Pattern::parse(&args.until)
        .map_err(|err| controller_error("invalid --until", err))?;
    let mut subroutine = Subroutine::new(name, until).with_transcript(args.transcript);
    if let Some(error) = &args.error {
        let error =
            Pattern::parse(error).map_err(|err| controller_error("invalid --error", err))?;
        subroutine = subroutine.with_error(error);
    }
    if let Some(timeout) = parse_optional_duration(args.timeout.as_deref())? {
        subroutine = subroutine.with_timeout(timeout);
    }
    Ok(subroutine)
}
