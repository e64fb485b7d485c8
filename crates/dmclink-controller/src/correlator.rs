//! Pairs each command with the one prompt that answers it.
//!
//! The wire carries no request identifiers, so correctness rests on there
//! being exactly one exchange in flight. Callers take turns through a fair
//! async mutex; the diagnostic `TC1` after a `?` runs inside the same turn.
//!
//! Each exchange subscribes to the channel's frames *before* writing and
//! drops the subscription on every exit path, so no listener outlives the
//! call.
//!
//! A command that times out still owes the channel one prompt. The
//! correlator counts prompts issued per connection against prompts
//! delivered, and the next exchange skips the ones still owed before it
//! attributes a prompt to itself.

use std::time::Duration;

use dmclink_frame::Sentinel;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::{Channel, PromptMark};
use crate::control::{self, ERROR_QUERY, UNKNOWN_ERROR};
use crate::error::{ControllerError, Result};
use crate::events::ChannelStatus;

/// Upper bound on the diagnostic query after a rejected command.
pub const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(5);

/// The answer to an accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// The command as sent, without terminator.
    pub command: String,
    /// Lines the controller printed before the prompt.
    pub lines: Vec<String>,
}

impl CommandResponse {
    /// Response lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

enum Payload<'a> {
    Line(&'a str),
    Raw(&'a [u8]),
}

enum Exchange {
    Accepted(Vec<String>),
    Rejected,
}

/// Prompts requested on one connection. Guarded by the turn.
#[derive(Debug, Default)]
struct Ledger {
    connection: u64,
    issued: u64,
}

impl Ledger {
    /// Prompts still owed to earlier exchanges as of `mark`.
    fn owed(&mut self, mark: PromptMark) -> u64 {
        if self.connection != mark.connection {
            *self = Ledger {
                connection: mark.connection,
                issued: 0,
            };
        }
        self.issued.saturating_sub(mark.prompts)
    }
}

/// Serializes command exchanges on one channel.
pub struct CommandCorrelator {
    channel: Channel,
    turn: Mutex<Ledger>,
}

impl CommandCorrelator {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            turn: Mutex::new(Ledger::default()),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Send `command` and wait for its prompt.
    ///
    /// `:` resolves with the lines printed before it. `?` fails with
    /// [`ControllerError::Command`] carrying the controller's explanation.
    /// The timeout starts once this call holds the turn.
    pub async fn send(&self, command: &str, timeout: Duration) -> Result<CommandResponse> {
        control::validate_command(command)?;
        self.transact(command, Payload::Line(command), Sentinel::Success, timeout)
            .await
    }

    /// Send a payload that carries its own terminator, such as an array
    /// download. `label` names it in errors and logs.
    pub async fn send_raw(
        &self,
        label: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<CommandResponse> {
        self.transact(label, Payload::Raw(payload), Sentinel::Success, timeout)
            .await
    }

    /// Send `command` and collect lines until `terminator` arrives.
    pub async fn stream(
        &self,
        command: &str,
        terminator: Sentinel,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        control::validate_command(command)?;
        self.transact(command, Payload::Line(command), terminator, timeout)
            .await
    }

    /// Send each command in order, stopping at the first failure.
    pub async fn send_all<S: AsRef<str>>(
        &self,
        commands: &[S],
        timeout: Duration,
    ) -> Result<Vec<CommandResponse>> {
        let mut responses = Vec::with_capacity(commands.len());
        for command in commands {
            responses.push(self.send(command.as_ref(), timeout).await?);
        }
        Ok(responses)
    }

    async fn transact(
        &self,
        label: &str,
        payload: Payload<'_>,
        until: Sentinel,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        let mut ledger = self.turn.lock().await;
        let _prompt = self.channel.expect_prompt();
        match self.exchange(&mut ledger, label, payload, until, timeout).await? {
            Exchange::Accepted(lines) => {
                debug!(channel = %self.channel.kind(), command = label, lines = lines.len(), "command accepted");
                Ok(CommandResponse {
                    command: label.to_string(),
                    lines,
                })
            }
            Exchange::Rejected => {
                let detail = self
                    .diagnose(&mut ledger, timeout.min(DIAGNOSTIC_TIMEOUT))
                    .await;
                debug!(channel = %self.channel.kind(), command = label, %detail, "command rejected");
                Err(ControllerError::Command {
                    command: label.to_string(),
                    detail,
                })
            }
        }
    }

    /// Ask the controller why the last command failed. Never fails; a
    /// broken diagnostic yields a placeholder.
    async fn diagnose(&self, ledger: &mut Ledger, timeout: Duration) -> String {
        match self
            .exchange(
                ledger,
                ERROR_QUERY,
                Payload::Line(ERROR_QUERY),
                Sentinel::Success,
                timeout,
            )
            .await
        {
            Ok(Exchange::Accepted(lines)) => {
                let text = lines
                    .iter()
                    .map(|line| line.trim())
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.is_empty() {
                    UNKNOWN_ERROR.to_string()
                } else {
                    text
                }
            }
            Ok(Exchange::Rejected) => UNKNOWN_ERROR.to_string(),
            Err(err) => {
                warn!(channel = %self.channel.kind(), error = %err, "diagnostic query failed");
                UNKNOWN_ERROR.to_string()
            }
        }
    }

    async fn exchange(
        &self,
        ledger: &mut Ledger,
        label: &str,
        payload: Payload<'_>,
        until: Sentinel,
        timeout: Duration,
    ) -> Result<Exchange> {
        let kind = self.channel.kind();
        let (mut frames, mark) = self.channel.subscribe_marked();
        let mut status = self.channel.watch_status();
        let mut owed = ledger.owed(mark);

        match payload {
            Payload::Line(text) => self.channel.write(text).await?,
            Payload::Raw(bytes) => self.channel.write_raw(bytes).await?,
        }
        ledger.issued += 1;
        if owed > 0 {
            debug!(channel = %kind, command = label, owed, "skipping prompts of timed-out commands");
        } else {
            debug!(channel = %kind, command = label, "command sent");
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut lines = Vec::new();

        loop {
            tokio::select! {
                received = frames.recv() => match received {
                    Ok(frame) => match frame.sentinel() {
                        Some(_) if owed > 0 => {
                            owed -= 1;
                            lines.clear();
                        }
                        Some(sentinel) if sentinel == until => return Ok(Exchange::Accepted(lines)),
                        Some(Sentinel::Error) => return Ok(Exchange::Rejected),
                        Some(_) => {}
                        None => lines.push(frame.text),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        return Err(ControllerError::Protocol(format!(
                            "missed {skipped} frames while waiting for '{label}'"
                        )));
                    }
                    Err(RecvError::Closed) => {
                        return Err(ControllerError::connection(kind, "channel closed"));
                    }
                },
                changed = status.changed() => {
                    if changed.is_err() || *status.borrow_and_update() != ChannelStatus::Connected {
                        return Err(ControllerError::connection(
                            kind,
                            format!("connection lost while waiting for '{label}'"),
                        ));
                    }
                }
                () = &mut deadline => {
                    return Err(ControllerError::Timeout {
                        operation: format!("command '{label}'"),
                        after: timeout,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for CommandCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCorrelator")
            .field("channel", &self.channel)
            .finish()
    }
}
