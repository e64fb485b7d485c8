//! Remote subroutine execution.
//!
//! A subroutine is triggered on the command channel with `XQ#<name>` and
//! reports completion on the message channel. The timeout measures
//! *inactivity*: every frame on the message channel pushes the deadline
//! out, so a chatty long-running routine never times out while a silent
//! one does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dmclink_frame::Frame;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::Channel;
use crate::control;
use crate::correlator::{CommandCorrelator, CommandResponse};
use crate::error::{ControllerError, Result};
use crate::events::ChannelStatus;
use crate::watcher::{Pattern, WatchMatch, WatcherHandle, WatcherRegistry};

/// Default inactivity timeout for a subroutine.
pub const DEFAULT_SUBROUTINE_TIMEOUT: Duration = Duration::from_secs(60);

/// A subroutine to run and how to tell when it is done.
#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    pub completion: Pattern,
    pub error: Option<Pattern>,
    /// Inactivity timeout.
    pub timeout: Duration,
    /// Keep the message frames seen before completion.
    pub keep_transcript: bool,
}

impl Subroutine {
    pub fn new(name: impl Into<String>, completion: impl Into<Pattern>) -> Self {
        Self {
            name: name.into(),
            completion: completion.into(),
            error: None,
            timeout: DEFAULT_SUBROUTINE_TIMEOUT,
            keep_transcript: false,
        }
    }

    pub fn with_error(mut self, pattern: impl Into<Pattern>) -> Self {
        self.error = Some(pattern.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transcript(mut self, keep: bool) -> Self {
        self.keep_transcript = keep;
        self
    }
}

/// Outcome of a completed subroutine.
#[derive(Debug, Clone)]
pub struct Execution {
    pub subroutine: String,
    /// The completion frame and its captures.
    pub matched: WatchMatch,
    /// Message frames received before the completion frame, when requested.
    pub transcript: Vec<Frame>,
    pub elapsed: Duration,
}

/// Runs subroutines and waits on messages.
#[derive(Debug)]
pub struct SubroutineExecutor {
    commands: Arc<CommandCorrelator>,
    messages: Channel,
    registry: WatcherRegistry,
    runs: AtomicU64,
}

impl SubroutineExecutor {
    /// `registry` must be fed from `messages`, see [`WatcherRegistry::attach`].
    pub fn new(
        commands: Arc<CommandCorrelator>,
        messages: Channel,
        registry: WatcherRegistry,
    ) -> Self {
        Self {
            commands,
            messages,
            registry,
            runs: AtomicU64::new(0),
        }
    }

    /// Trigger `subroutine` and wait for its completion or error pattern.
    ///
    /// Both watchers are registered before the trigger goes out, and both
    /// are cancelled however the call ends.
    pub async fn execute(&self, subroutine: &Subroutine) -> Result<Execution> {
        let trigger = control::execute(&subroutine.name)?;
        let owner = format!(
            "xq:{}:{}",
            subroutine.name,
            self.runs.fetch_add(1, Ordering::Relaxed)
        );

        let mut activity = self.messages.subscribe();
        let mut status = self.messages.watch_status();
        let mut done = self
            .registry
            .watch_as(&owner, subroutine.completion.clone());
        let mut failed = subroutine
            .error
            .clone()
            .map(|pattern| self.registry.watch_as(&owner, pattern));

        let started = std::time::Instant::now();
        let result = self
            .run(subroutine, &trigger, &mut activity, &mut status, &mut done, &mut failed)
            .await;

        self.registry.cancel_owner(&owner);
        match &result {
            Ok(execution) => info!(
                subroutine = %subroutine.name,
                elapsed_ms = execution.elapsed.as_millis() as u64,
                "subroutine completed"
            ),
            Err(err) => warn!(
                subroutine = %subroutine.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "subroutine did not complete"
            ),
        }
        result
    }

    async fn run(
        &self,
        subroutine: &Subroutine,
        trigger: &str,
        activity: &mut tokio::sync::broadcast::Receiver<Frame>,
        status: &mut tokio::sync::watch::Receiver<ChannelStatus>,
        done: &mut WatcherHandle,
        failed: &mut Option<WatcherHandle>,
    ) -> Result<Execution> {
        let kind = self.messages.kind();
        if !self.messages.is_connected() {
            return Err(ControllerError::connection(kind, "not connected"));
        }

        let started = std::time::Instant::now();
        self.commands.send(trigger, subroutine.timeout).await?;
        debug!(subroutine = %subroutine.name, "triggered, awaiting completion");

        let deadline = tokio::time::sleep(subroutine.timeout);
        tokio::pin!(deadline);
        let mut transcript = Vec::new();

        loop {
            tokio::select! {
                biased;

                matched = done.resolved() => {
                    let matched = matched.ok_or_else(|| {
                        ControllerError::connection(kind, "watcher registry shut down")
                    })?;
                    if subroutine.keep_transcript {
                        drain_until(activity, &mut transcript, matched.frame.seq);
                    }
                    transcript.retain(|frame: &Frame| frame.seq < matched.frame.seq);
                    return Ok(Execution {
                        subroutine: subroutine.name.clone(),
                        matched,
                        transcript,
                        elapsed: started.elapsed(),
                    });
                }
                matched = resolve_optional(failed) => {
                    return Err(match matched {
                        Some(matched) => ControllerError::Remote {
                            subroutine: subroutine.name.clone(),
                            message: matched.frame.text,
                        },
                        None => ControllerError::connection(kind, "watcher registry shut down"),
                    });
                }
                received = activity.recv() => match received {
                    Ok(frame) => {
                        deadline.as_mut().reset(Instant::now() + subroutine.timeout);
                        if subroutine.keep_transcript {
                            transcript.push(frame);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        deadline.as_mut().reset(Instant::now() + subroutine.timeout);
                        warn!(subroutine = %subroutine.name, skipped, "transcript fell behind");
                    }
                    Err(RecvError::Closed) => {
                        return Err(ControllerError::connection(kind, "channel closed"));
                    }
                },
                changed = status.changed() => {
                    if changed.is_err() || *status.borrow_and_update() != ChannelStatus::Connected {
                        return Err(ControllerError::connection(
                            kind,
                            format!("connection lost while running '{}'", subroutine.name),
                        ));
                    }
                }
                () = &mut deadline => {
                    return Err(ControllerError::Timeout {
                        operation: format!("subroutine '{}'", subroutine.name),
                        after: subroutine.timeout,
                    });
                }
            }
        }
    }

    /// Wait for one message matching `pattern`. The timeout is absolute.
    pub async fn await_message(
        &self,
        pattern: impl Into<Pattern>,
        timeout: Duration,
    ) -> Result<WatchMatch> {
        let kind = self.messages.kind();
        let mut handle = self.registry.watch(pattern);
        let mut status = self.messages.watch_status();
        if !self.messages.is_connected() {
            return Err(ControllerError::connection(kind, "not connected"));
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;

                matched = handle.resolved() => {
                    return matched.ok_or_else(|| {
                        ControllerError::connection(kind, "watcher registry shut down")
                    });
                }
                changed = status.changed() => {
                    if changed.is_err() || *status.borrow_and_update() != ChannelStatus::Connected {
                        return Err(ControllerError::connection(kind, "connection lost while waiting for message"));
                    }
                }
                () = &mut deadline => {
                    return Err(ControllerError::Timeout {
                        operation: format!("message {}", handle.pattern()),
                        after: timeout,
                    });
                }
            }
        }
    }

    /// Send commands strictly in order, stopping at the first failure.
    pub async fn send_commands<S: AsRef<str>>(
        &self,
        commands: &[S],
        timeout: Duration,
    ) -> Result<Vec<CommandResponse>> {
        self.commands.send_all(commands, timeout).await
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }
}

/// Watchers are fed by their own subscription, so the completion can be
/// seen before `activity` has been read up to it. Everything up to the
/// matched frame is already queued there.
fn drain_until(
    activity: &mut tokio::sync::broadcast::Receiver<Frame>,
    transcript: &mut Vec<Frame>,
    matched_seq: u64,
) {
    loop {
        match activity.try_recv() {
            Ok(frame) if frame.seq < matched_seq => transcript.push(frame),
            Ok(_) => break,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "transcript fell behind");
            }
            Err(_) => break,
        }
    }
}

async fn resolve_optional(handle: &mut Option<WatcherHandle>) -> Option<WatchMatch> {
    match handle {
        Some(handle) => handle.resolved().await,
        None => std::future::pending().await,
    }
}
