//! The controller facade.
//!
//! A [`Controller`] owns both channels and everything layered on them. It
//! is an explicit value: create one per controller, share it behind an
//! `Arc` if several tasks need it. Dropping it stops every background task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dmclink_frame::{ChannelKind, Frame};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::array;
use crate::config::ControllerConfig;
use crate::connection::{Channel, ChannelSnapshot};
use crate::correlator::{CommandCorrelator, CommandResponse};
use crate::error::Result;
use crate::events::{ChannelStatus, ControllerEvent, StatusEvent};
use crate::executor::{Execution, Subroutine, SubroutineExecutor};
use crate::handshake::{post_connect_handshake, HANDSHAKE_TIMEOUT};
use crate::watcher::{Pattern, WatchMatch, WatcherHandle, WatcherRegistry};

/// Aggregated status of both channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    /// Least healthy of the two channel statuses.
    pub status: ChannelStatus,
    pub commands: ChannelSnapshot,
    pub messages: ChannelSnapshot,
}

/// Client engine for one controller.
pub struct Controller {
    config: ControllerConfig,
    commands: Channel,
    messages: Channel,
    correlator: Arc<CommandCorrelator>,
    message_correlator: Arc<CommandCorrelator>,
    executor: SubroutineExecutor,
    registry: WatcherRegistry,
    events: broadcast::Sender<ControllerEvent>,
    background: Mutex<Option<CancellationToken>>,
    // Set once an explicit connect has completed its handshake.
    online: Arc<AtomicBool>,
}

impl Controller {
    /// Validate `config` and build an unconnected controller.
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.message_buffer_limit.max(16));
        let commands = Channel::with_events(
            ChannelKind::Commands,
            config.channel_options(),
            events.clone(),
        );
        let messages = Channel::with_events(
            ChannelKind::Messages,
            config.message_channel_options(),
            events.clone(),
        );
        let correlator = Arc::new(CommandCorrelator::new(commands.clone()));
        let message_correlator = Arc::new(CommandCorrelator::new(messages.clone()));
        let registry = WatcherRegistry::new();
        let executor =
            SubroutineExecutor::new(correlator.clone(), messages.clone(), registry.clone());

        Ok(Self {
            config,
            commands,
            messages,
            correlator,
            message_correlator,
            executor,
            registry,
            events,
            background: Mutex::new(None),
            online: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn channel(&self, kind: ChannelKind) -> &Channel {
        match kind {
            ChannelKind::Commands => &self.commands,
            ChannelKind::Messages => &self.messages,
        }
    }

    /// Connect both channels, then send the handshake on the message channel.
    pub async fn connect(&self) -> Result<()> {
        self.online.store(false, Ordering::Release);
        self.ensure_background();
        let (commands, messages) = tokio::join!(
            self.commands.connect(self.config.endpoint()),
            self.messages.connect(self.config.message_endpoint()),
        );
        commands?;
        messages?;
        self.finish_connect().await
    }

    /// Reconnect both channels to their stored endpoints.
    pub async fn reconnect(&self) -> Result<()> {
        self.online.store(false, Ordering::Release);
        self.ensure_background();
        let (commands, messages) =
            tokio::join!(self.commands.reconnect(), self.messages.reconnect());
        commands?;
        messages?;
        self.finish_connect().await
    }

    /// Close both channels and cancel any reconnect in progress. Idempotent.
    pub async fn disconnect(&self) {
        self.online.store(false, Ordering::Release);
        tokio::join!(self.commands.disconnect(), self.messages.disconnect());
    }

    async fn finish_connect(&self) -> Result<()> {
        if let Some(command) = self.config.handshake() {
            post_connect_handshake(&self.message_correlator, command, HANDSHAKE_TIMEOUT).await?;
        }
        self.online.store(true, Ordering::Release);
        info!(
            commands = %self.config.endpoint(),
            messages = %self.config.message_endpoint(),
            "controller connected"
        );
        Ok(())
    }

    /// Send one command with the default timeout.
    pub async fn send_command(&self, command: &str) -> Result<CommandResponse> {
        self.correlator
            .send(command, self.config.default_timeout())
            .await
    }

    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResponse> {
        self.correlator.send(command, timeout).await
    }

    /// Send commands strictly in order, stopping at the first failure.
    pub async fn send_commands<S: AsRef<str>>(&self, commands: &[S]) -> Result<Vec<CommandResponse>> {
        self.executor
            .send_commands(commands, self.config.default_timeout())
            .await
    }

    pub async fn send_commands_with_timeout<S: AsRef<str>>(
        &self,
        commands: &[S],
        timeout: Duration,
    ) -> Result<Vec<CommandResponse>> {
        self.executor.send_commands(commands, timeout).await
    }

    /// Run a subroutine to completion.
    pub async fn execute(&self, subroutine: &Subroutine) -> Result<Execution> {
        self.executor.execute(subroutine).await
    }

    /// Wait for one message matching `pattern`.
    pub async fn await_message(
        &self,
        pattern: impl Into<Pattern>,
        timeout: Duration,
    ) -> Result<WatchMatch> {
        self.executor.await_message(pattern, timeout).await
    }

    /// Watch the message channel for `pattern`.
    pub fn watch(&self, pattern: impl Into<Pattern>) -> WatcherHandle {
        self.registry.watch(pattern)
    }

    pub fn watch_as(&self, owner: &str, pattern: impl Into<Pattern>) -> WatcherHandle {
        self.registry.watch_as(owner, pattern)
    }

    /// Cancel every watcher of `owner`.
    pub fn cancel_watchers(&self, owner: &str) -> usize {
        self.registry.cancel_owner(owner)
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub async fn download_array(&self, name: &str, values: &[f64]) -> Result<()> {
        array::download(&self.correlator, name, values, self.config.default_timeout()).await
    }

    pub async fn upload_array(&self, name: &str) -> Result<Vec<f64>> {
        self.upload_array_with_timeout(name, self.config.default_timeout())
            .await
    }

    /// Upload with an explicit deadline for the whole stream.
    pub async fn upload_array_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Vec<f64>> {
        array::upload(&self.correlator, name, timeout).await
    }

    pub async fn list_arrays(&self) -> Result<Vec<String>> {
        array::list(&self.correlator, self.config.default_timeout()).await
    }

    pub fn status(&self) -> ControllerStatus {
        let commands = self.commands.snapshot();
        let messages = self.messages.snapshot();
        ControllerStatus {
            status: ChannelStatus::aggregate(commands.status, messages.status),
            commands,
            messages,
        }
    }

    /// Frame and status events from both channels.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_frames(&self, kind: ChannelKind) -> broadcast::Receiver<Frame> {
        self.channel(kind).subscribe()
    }

    /// Start watcher dispatch and the re-handshake task, once.
    fn ensure_background(&self) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            return;
        }
        let shutdown = CancellationToken::new();
        self.registry.attach(&self.messages, shutdown.child_token());
        if let Some(command) = self.config.handshake() {
            self.spawn_rehandshake(command.to_string(), shutdown.child_token());
        }
        *background = Some(shutdown);
    }

    /// Re-apply the handshake whenever the message channel comes back on its
    /// own. Explicit connects run their own handshake.
    fn spawn_rehandshake(&self, command: String, shutdown: CancellationToken) {
        let mut events = self.events.subscribe();
        let correlator = self.message_correlator.clone();
        let online = self.online.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(ControllerEvent::Status(StatusEvent {
                        channel: ChannelKind::Messages,
                        status: ChannelStatus::Connected,
                        attempt: Some(attempt),
                        ..
                    })) if online.load(Ordering::Acquire) => {
                        info!(attempt, "message channel reconnected, re-applying handshake");
                        // Failure is logged by the handshake itself.
                        let _ = post_connect_handshake(&correlator, &command, HANDSHAKE_TIMEOUT).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "re-handshake task fell behind on events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("re-handshake task stopped");
        });
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(shutdown) = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            shutdown.cancel();
        }
        self.commands.abort();
        self.messages.abort();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("endpoint", &self.config.endpoint())
            .field("commands", &self.commands.status())
            .field("messages", &self.messages.status())
            .finish()
    }
}
