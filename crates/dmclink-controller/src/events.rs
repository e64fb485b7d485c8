use std::fmt;

use dmclink_frame::{ChannelKind, Frame};
use serde::{Deserialize, Serialize};

/// Connection state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Retries exhausted; stays here until an explicit reconnect.
    Failed,
}

impl ChannelStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Combined status of two channels: the least healthy wins.
    pub fn aggregate(a: Self, b: Self) -> Self {
        fn rank(status: ChannelStatus) -> u8 {
            match status {
                ChannelStatus::Connected => 0,
                ChannelStatus::Connecting => 1,
                ChannelStatus::Disconnected => 2,
                ChannelStatus::Failed => 3,
            }
        }
        if rank(a) >= rank(b) {
            a
        } else {
            b
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A received line, as published to event subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub channel: ChannelKind,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl From<&Frame> for FrameEvent {
    fn from(frame: &Frame) -> Self {
        Self {
            channel: frame.channel,
            text: frame.text.clone(),
            timestamp: frame.timestamp_millis(),
        }
    }
}

/// A channel status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub channel: ChannelKind,
    pub status: ChannelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Reconnect attempt number, for transitions driven by the retry loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// Everything the engine publishes to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerEvent {
    Frame(FrameEvent),
    Status(StatusEvent),
}

impl ControllerEvent {
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Frame(event) => event.channel,
            Self::Status(event) => event.channel,
        }
    }
}
