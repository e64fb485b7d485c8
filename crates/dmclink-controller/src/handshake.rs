use std::time::Duration;

use tracing::{debug, warn};

use crate::correlator::CommandCorrelator;
use crate::error::{ControllerError, Result};

/// Default bound on the post-connect handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configure the message channel after it connects.
///
/// The controller answers the handshake with a prompt on the same channel,
/// so it runs through a correlator bound to that channel.
pub async fn post_connect_handshake(
    correlator: &CommandCorrelator,
    command: &str,
    timeout: Duration,
) -> Result<()> {
    let channel = correlator.channel().kind();
    match correlator.send(command, timeout).await {
        Ok(_) => {
            debug!(%channel, command, "handshake complete");
            Ok(())
        }
        Err(err) => {
            warn!(%channel, command, error = %err, "handshake failed");
            Err(ControllerError::HandshakeFailed(format!(
                "'{command}' on {channel} channel: {err}"
            )))
        }
    }
}
