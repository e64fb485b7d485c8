use dmclink_controller::{ChannelKind, ChannelStatus, FrameEvent, Pattern};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::cmd::{connect, ConnectionArgs, WatchArgs};
use crate::exit::{controller_error, CliError, CliResult, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub async fn run(
    args: WatchArgs,
    connection: &ConnectionArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let filter = args
        .pattern
        .as_deref()
        .map(Pattern::parse)
        .transpose()
        .map_err(|err| controller_error("invalid --pattern", err))?;

    let controller = connect(connection).await?;
    let mut frames = controller.subscribe_frames(ChannelKind::Messages);
    let mut status = controller.channel(ChannelKind::Messages).watch_status();
    let mut printed = 0usize;

    let current = *status.borrow_and_update();
    if ends_watch(current) {
        controller.disconnect().await;
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("message channel {}", current.name()),
        ));
    }

    let outcome = loop {
        if args.count.is_some_and(|count| printed >= count) {
            break Ok(SUCCESS);
        }
        let frame = tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(SUCCESS),
            changed = status.changed() => {
                let current = *status.borrow_and_update();
                if changed.is_err() || ends_watch(current) {
                    break Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("message channel {}", current.name()),
                    ));
                }
                continue;
            }
            frame = frames.recv() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "message output fell behind");
                continue;
            }
            Err(RecvError::Closed) => {
                break Err(CliError::new(TRANSPORT_ERROR, "message channel closed"));
            }
        };
        if filter.as_ref().is_some_and(|pattern| !pattern.is_match(&frame.text)) {
            continue;
        }
        print_message(&FrameEvent::from(&frame), format);
        printed = printed.saturating_add(1);
    };

    controller.disconnect().await;
    outcome
}

/// Reconnect attempts keep the watch alive; only a terminal state ends it.
fn ends_watch(status: ChannelStatus) -> bool {
    matches!(status, ChannelStatus::Failed | ChannelStatus::Disconnected)
}
