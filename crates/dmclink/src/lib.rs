//! Client engine for a two-channel, line-oriented motion controller.
//!
//! dmclink talks to the controller over two TCP channels: a *command*
//! channel for synchronous request/response and a *message* channel for
//! unsolicited output such as subroutine completion markers.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints and connect-with-timeout
//! - [`frame`]: line and prompt framing of the ASCII byte stream
//! - [`controller`]: channels, command correlation, subroutines, arrays
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use dmclink::{Controller, ControllerConfig, Pattern, Subroutine};
//!
//! # async fn run() -> dmclink::Result<()> {
//! let controller = Controller::new(ControllerConfig::new("192.168.1.4", 23))?;
//! controller.connect().await?;
//!
//! controller.send_command("SH").await?;
//! let startup = Subroutine::new("Startup", Pattern::regex("^End:Startup$")?)
//!     .with_timeout(Duration::from_secs(30));
//! controller.execute(&startup).await?;
//!
//! controller.download_array("order", &[0.0, 1.0, 2.0]).await?;
//! let order = controller.upload_array("order").await?;
//! # let _ = order;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use dmclink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dmclink_frame::*;
}

/// Re-export controller types.
pub mod controller {
    pub use dmclink_controller::*;
}

pub use dmclink_controller::{
    ChannelKind, ChannelStatus, CommandResponse, Controller, ControllerConfig, ControllerError,
    ControllerEvent, ControllerStatus, Execution, Pattern, Result, Subroutine, WatchMatch,
    WatcherHandle,
};
