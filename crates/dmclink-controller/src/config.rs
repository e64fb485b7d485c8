use std::path::Path;
use std::time::Duration;

use dmclink_frame::{CodecConfig, PromptGate, DEFAULT_MAX_LINE};
use dmclink_transport::{Endpoint, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::connection::ChannelOptions;
use crate::control::DEFAULT_HANDSHAKE;
use crate::error::{ControllerError, Result};

/// Engine configuration, loaded from JSON with camelCase keys.
///
/// Every field has a default, so `{}` is a valid configuration for a
/// controller on `127.0.0.1:23`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// TCP port of the command channel.
    pub port: u16,
    /// TCP port of the message channel. Defaults to `port`.
    pub message_port: Option<u16>,
    /// Timeout for commands, subroutines and uploads, in milliseconds.
    pub default_timeout_ms: u64,
    /// Capacity of per-channel frame history and broadcast buffers.
    pub message_buffer_limit: usize,
    /// Reconnect attempts after an unexpected close.
    pub max_retries: u32,
    /// Bound on one TCP connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound on the reconnect delay.
    pub backoff_cap_ms: u64,
    /// Command sent on the message channel after it connects. `null` skips it.
    pub handshake_command: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            message_port: None,
            default_timeout_ms: 60_000,
            message_buffer_limit: 1024,
            max_retries: 5,
            connect_timeout_ms: 5_000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            handshake_command: Some(DEFAULT_HANDSHAKE.to_string()),
        }
    }
}

impl ControllerConfig {
    /// Configuration for `host:port` with every other field defaulted.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| ControllerError::Config(format!("invalid JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ControllerError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ControllerError::Config("host must not be empty".into()));
        }
        if self.port == 0 || self.message_port == Some(0) {
            return Err(ControllerError::Config("port must be non-zero".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(ControllerError::Config(
                "defaultTimeoutMs must be non-zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ControllerError::Config(
                "connectTimeoutMs must be non-zero".into(),
            ));
        }
        if self.message_buffer_limit == 0 {
            return Err(ControllerError::Config(
                "messageBufferLimit must be non-zero".into(),
            ));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(ControllerError::Config(format!(
                "backoffBaseMs ({}) exceeds backoffCapMs ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        Ok(())
    }

    /// Command channel endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Message channel endpoint.
    pub fn message_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.message_port.unwrap_or(self.port))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
        )
    }

    /// Handshake command, if one is configured and non-blank.
    pub fn handshake(&self) -> Option<&str> {
        self.handshake_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }

    /// Command channel options.
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: self.connect_timeout(),
            max_retries: self.max_retries,
            backoff: self.backoff(),
            history_limit: self.message_buffer_limit,
            codec: CodecConfig {
                max_line_length: DEFAULT_MAX_LINE,
                recognize_prompts: true,
                prompt_gate: None,
            },
        }
    }

    /// Message channel options. Unsolicited text may start with a prompt
    /// character, so a bare prompt only ends a line while an exchange waits.
    pub fn message_channel_options(&self) -> ChannelOptions {
        let mut options = self.channel_options();
        options.codec.prompt_gate = Some(PromptGate::new());
        options
    }
}
