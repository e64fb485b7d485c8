//! Protocol engine for a two-channel motion controller.
//!
//! This is the "just works" layer. A [`Controller`] owns the command and
//! message [`Channel`]s, keeps them connected, and exposes the operations a
//! caller needs: send commands, run subroutines, watch messages, and move
//! arrays.
//!
//! The wire protocol has no request identifiers, so the command channel
//! carries at most one command at a time. Concurrent callers queue in FIFO
//! order inside the [`CommandCorrelator`].

pub mod array;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod control;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod handshake;
pub mod watcher;

pub use backoff::Backoff;
pub use config::ControllerConfig;
pub use connection::{Channel, ChannelOptions, ChannelSnapshot};
pub use correlator::{CommandCorrelator, CommandResponse};
pub use engine::{Controller, ControllerStatus};
pub use error::{ControllerError, Result};
pub use events::{ChannelStatus, ControllerEvent, FrameEvent, StatusEvent};
pub use executor::{Execution, Subroutine, SubroutineExecutor};
pub use watcher::{Captures, Pattern, WatchMatch, WatcherHandle, WatcherRegistry};

pub use dmclink_frame::{ChannelKind, Frame};
pub use dmclink_transport::Endpoint;
