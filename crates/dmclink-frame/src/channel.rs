//! The two channels every controller connection consists of.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Identity of a controller channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Synchronous request/response traffic.
    Commands,
    /// Unsolicited output: `MG` messages, subroutine markers.
    Messages,
}

impl ChannelKind {
    /// Both channels, in connect order.
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Commands, ChannelKind::Messages];

    /// Wire-independent name used in events and logs.
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Commands => "commands",
            ChannelKind::Messages => "messages",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commands" | "command" => Ok(ChannelKind::Commands),
            "messages" | "message" => Ok(ChannelKind::Messages),
            _ => Err(FrameError::UnknownChannel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in ChannelKind::ALL {
            assert_eq!(kind.name().parse::<ChannelKind>().unwrap(), kind);
        }
        assert!(matches!(
            "interrupts".parse::<ChannelKind>(),
            Err(FrameError::UnknownChannel(_))
        ));
    }
}
