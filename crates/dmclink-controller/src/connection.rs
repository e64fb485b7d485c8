//! One TCP connection to the controller, kept alive across drops.
//!
//! A [`Channel`] owns at most one live socket. Its reader task decodes
//! frames, publishes them, and on an unexpected close walks the capped
//! exponential backoff until the socket is back or retries run out.
//!
//! Every connect starts a new *session* identified by a
//! [`CancellationToken`]. Status transitions from a session that has been
//! cancelled are dropped, so a `disconnect()` racing a reconnect attempt
//! always ends in `disconnected`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dmclink_frame::{
    ChannelKind, CodecConfig, Frame, FrameError, FrameReader, FrameWriter, PromptGate,
    PromptGateGuard,
};
use dmclink_transport::{Endpoint, TcpConnector, DEFAULT_CONNECT_TIMEOUT};
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::error::{ControllerError, Result};
use crate::events::{ChannelStatus, ControllerEvent, FrameEvent, StatusEvent};

/// Failure reason recorded once reconnect attempts are used up.
pub const RETRIES_EXHAUSTED: &str = "max retries exceeded";

const NOT_CONNECTED: &str = "not connected";

const MIN_BROADCAST_CAPACITY: usize = 16;

/// How many prompts the current connection had delivered when a
/// subscription was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PromptMark {
    /// Counts installed sockets; changes on every (re)connect.
    pub connection: u64,
    pub prompts: u64,
}

/// Per-channel connection settings.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Reconnect attempts after an unexpected close.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Frames kept in the recent-frame tail; also sizes the broadcasts.
    pub history_limit: usize,
    pub codec: CodecConfig,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: 5,
            backoff: Backoff::default(),
            history_limit: 1024,
            codec: CodecConfig::default(),
        }
    }
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnapshot {
    pub channel: ChannelKind,
    pub status: ChannelStatus,
    pub retry_count: u32,
    pub last_failure: Option<String>,
    /// Milliseconds since the Unix epoch of the last frame or write.
    pub last_activity: Option<u64>,
    pub endpoint: Option<Endpoint>,
}

/// A controller channel. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    kind: ChannelKind,
    options: ChannelOptions,
    connector: TcpConnector,
    state: Mutex<State>,
    writer: tokio::sync::Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
    status_tx: watch::Sender<ChannelStatus>,
    frames_tx: broadcast::Sender<Frame>,
    events_tx: broadcast::Sender<ControllerEvent>,
    next_seq: AtomicU64,
}

#[derive(Default)]
struct State {
    endpoint: Option<Endpoint>,
    session: Option<CancellationToken>,
    retry_count: u32,
    last_failure: Option<String>,
    last_activity: Option<SystemTime>,
    recent: VecDeque<Frame>,
    connections: u64,
    prompts: u64,
}

impl Channel {
    /// Create a channel that publishes events to its own broadcast.
    pub fn new(kind: ChannelKind, options: ChannelOptions) -> Self {
        let (events_tx, _) =
            broadcast::channel(options.history_limit.max(MIN_BROADCAST_CAPACITY));
        Self::with_events(kind, options, events_tx)
    }

    /// Create a channel that publishes events to a shared broadcast.
    pub fn with_events(
        kind: ChannelKind,
        options: ChannelOptions,
        events_tx: broadcast::Sender<ControllerEvent>,
    ) -> Self {
        let capacity = options.history_limit.max(MIN_BROADCAST_CAPACITY);
        let (frames_tx, _) = broadcast::channel(capacity);
        let (status_tx, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                kind,
                connector: TcpConnector::new(options.connect_timeout),
                options,
                state: Mutex::new(State::default()),
                writer: tokio::sync::Mutex::new(None),
                status_tx,
                frames_tx,
                events_tx,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    /// Watch status transitions. The current value counts as seen.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Receive every frame decoded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.inner.frames_tx.subscribe()
    }

    /// Subscribe and learn, atomically, how many prompts this connection
    /// has already delivered. Every prompt is either counted in the mark or
    /// received by the subscription, never both.
    pub(crate) fn subscribe_marked(&self) -> (broadcast::Receiver<Frame>, PromptMark) {
        let state = self.state();
        let frames = self.inner.frames_tx.subscribe();
        let mark = PromptMark {
            connection: state.connections,
            prompts: state.prompts,
        };
        (frames, mark)
    }

    /// Let the codec emit unterminated prompts until the guard drops.
    /// `None` when this channel recognizes them all the time.
    pub(crate) fn expect_prompt(&self) -> Option<PromptGateGuard> {
        self.inner
            .options
            .codec
            .prompt_gate
            .as_ref()
            .map(PromptGate::open)
    }

    /// Number of live frame subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.frames_tx.receiver_count()
    }

    /// Receive frame and status events from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state();
        ChannelSnapshot {
            channel: self.inner.kind,
            status: self.status(),
            retry_count: state.retry_count,
            last_failure: state.last_failure.clone(),
            last_activity: state.last_activity.map(epoch_millis),
            endpoint: state.endpoint.clone(),
        }
    }

    /// The most recent frames, oldest first.
    pub fn recent_frames(&self) -> Vec<Frame> {
        self.state().recent.iter().cloned().collect()
    }

    /// Open a socket to `endpoint` and start the reader task.
    ///
    /// Any previous session is cancelled first. On failure the status
    /// becomes `failed` with the transport's reason; no retry is scheduled.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<()> {
        let token = CancellationToken::new();
        {
            let mut state = self.state();
            if let Some(previous) = state.session.replace(token.clone()) {
                previous.cancel();
            }
            state.endpoint = Some(endpoint.clone());
        }
        self.inner.writer.lock().await.take();
        self.transition(&token, ChannelStatus::Connecting, None, None);

        let attempt = tokio::select! {
            _ = token.cancelled() => {
                return Err(ControllerError::connection(self.inner.kind, "disconnected while connecting"));
            }
            attempt = self.inner.connector.connect(&endpoint) => attempt,
        };

        let stream = match attempt {
            Ok(stream) => stream,
            Err(err) => {
                let reason = err.reason();
                warn!(channel = %self.inner.kind, %endpoint, %reason, "connect failed");
                self.state().last_failure = Some(reason.clone());
                self.transition(&token, ChannelStatus::Failed, Some(reason), None);
                return Err(err.into());
            }
        };

        let (read, write) = stream.into_split();
        if !self.install(&token, write, None).await {
            return Err(ControllerError::connection(
                self.inner.kind,
                "disconnected while connecting",
            ));
        }
        info!(channel = %self.inner.kind, %endpoint, "channel connected");

        let reader = FrameReader::with_config(read, self.inner.kind, self.inner.options.codec.clone());
        tokio::spawn(self.clone().run_session(reader, endpoint, token));
        Ok(())
    }

    /// Reset the retry count and connect again to the stored endpoint.
    pub async fn reconnect(&self) -> Result<()> {
        let endpoint = {
            let mut state = self.state();
            state.retry_count = 0;
            state.endpoint.clone()
        };
        let endpoint = endpoint
            .ok_or_else(|| ControllerError::connection(self.inner.kind, "no endpoint to reconnect to"))?;
        self.connect(endpoint).await
    }

    /// Cancel any reconnect in progress and close the socket. Idempotent.
    pub async fn disconnect(&self) {
        if self.abort() {
            info!(channel = %self.inner.kind, "channel disconnected");
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                debug!(channel = %self.inner.kind, error = %err, "socket shutdown failed");
            }
        }
    }

    /// Synchronous half of [`disconnect`](Self::disconnect): cancels the
    /// session and publishes `disconnected`. Returns false when already
    /// disconnected.
    pub(crate) fn abort(&self) -> bool {
        let mut state = self.state();
        let session = state.session.take();
        if let Some(token) = &session {
            token.cancel();
        }
        state.retry_count = 0;
        if session.is_none() && self.status() == ChannelStatus::Disconnected {
            return false;
        }
        self.publish_status(ChannelStatus::Disconnected, None, None);
        true
    }

    /// Send one command line; the terminator is appended.
    pub async fn write(&self, text: &str) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = self.connected_writer(&mut guard)?;
        let sent = writer.send_line(text).await;
        drop(guard);
        self.after_write(sent)
    }

    /// Send bytes verbatim.
    pub async fn write_raw(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = self.connected_writer(&mut guard)?;
        let sent = writer.send_raw(payload).await;
        drop(guard);
        self.after_write(sent)
    }

    fn connected_writer<'a>(
        &self,
        slot: &'a mut Option<FrameWriter<OwnedWriteHalf>>,
    ) -> Result<&'a mut FrameWriter<OwnedWriteHalf>> {
        if !self.is_connected() {
            return Err(ControllerError::connection(self.inner.kind, NOT_CONNECTED));
        }
        slot.as_mut()
            .ok_or_else(|| ControllerError::connection(self.inner.kind, NOT_CONNECTED))
    }

    fn after_write(&self, sent: dmclink_frame::Result<()>) -> Result<()> {
        match sent {
            Ok(()) => {
                self.state().last_activity = Some(SystemTime::now());
                Ok(())
            }
            Err(err @ FrameError::LineTooLong { .. }) => Err(err.into()),
            // The reader task notices the broken socket and drives the retry.
            Err(err) => Err(ControllerError::connection(self.inner.kind, err.to_string())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the write half and publish `connected`, unless the session was
    /// cancelled meanwhile.
    async fn install(
        &self,
        token: &CancellationToken,
        write: OwnedWriteHalf,
        attempt: Option<u32>,
    ) -> bool {
        let mut slot = self.inner.writer.lock().await;
        let mut state = self.state();
        if token.is_cancelled() {
            return false;
        }
        *slot = Some(FrameWriter::with_config(write, self.inner.options.codec.clone()));
        state.retry_count = 0;
        state.last_failure = None;
        state.last_activity = Some(SystemTime::now());
        state.connections += 1;
        state.prompts = 0;
        self.publish_status(ChannelStatus::Connected, None, attempt);
        true
    }

    fn transition(
        &self,
        token: &CancellationToken,
        status: ChannelStatus,
        reason: Option<String>,
        attempt: Option<u32>,
    ) {
        let _state = self.state();
        if token.is_cancelled() {
            return;
        }
        self.publish_status(status, reason, attempt);
    }

    /// Caller holds the state lock.
    fn publish_status(&self, status: ChannelStatus, reason: Option<String>, attempt: Option<u32>) {
        self.inner.status_tx.send_replace(status);
        let _ = self.inner.events_tx.send(ControllerEvent::Status(StatusEvent {
            channel: self.inner.kind,
            status,
            reason,
            attempt,
        }));
    }

    fn publish_frame(&self, frame: Frame) {
        let frame = frame.with_seq(self.inner.next_seq.fetch_add(1, Ordering::Relaxed));
        debug!(channel = %self.inner.kind, seq = frame.seq, text = %frame.text, "frame received");
        let _ = self
            .inner
            .events_tx
            .send(ControllerEvent::Frame(FrameEvent::from(&frame)));

        // Counting and sending under one lock keeps `subscribe_marked` exact.
        let mut state = self.state();
        state.last_activity = Some(frame.received_at);
        if frame.sentinel().is_some() {
            state.prompts += 1;
        }
        if state.recent.len() >= self.inner.options.history_limit {
            state.recent.pop_front();
        }
        state.recent.push_back(frame.clone());
        let _ = self.inner.frames_tx.send(frame);
    }

    async fn run_session(
        self,
        mut reader: FrameReader<OwnedReadHalf>,
        endpoint: Endpoint,
        token: CancellationToken,
    ) {
        loop {
            let reason = loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    read = reader.read_frame() => match read {
                        Ok(frame) => self.publish_frame(frame),
                        Err(FrameError::ConnectionClosed) => break "connection closed by controller".to_string(),
                        Err(err) => break err.to_string(),
                    },
                }
            };

            match self.recover(&endpoint, &token, reason).await {
                Some(next) => reader = next,
                None => return,
            }
        }
    }

    /// Reconnect with backoff after an unexpected close. Returns the new
    /// reader, or `None` once retries are exhausted or the session ends.
    async fn recover(
        &self,
        endpoint: &Endpoint,
        token: &CancellationToken,
        reason: String,
    ) -> Option<FrameReader<OwnedReadHalf>> {
        let kind = self.inner.kind;
        warn!(channel = %kind, %reason, "connection lost");
        self.inner.writer.lock().await.take();
        self.state().last_failure = Some(reason);

        loop {
            let attempt = {
                let mut state = self.state();
                if state.retry_count >= self.inner.options.max_retries {
                    None
                } else {
                    state.retry_count += 1;
                    Some((state.retry_count, state.last_failure.clone()))
                }
            };

            let Some((attempt, last_failure)) = attempt else {
                self.state().last_failure = Some(RETRIES_EXHAUSTED.to_string());
                self.transition(
                    token,
                    ChannelStatus::Failed,
                    Some(RETRIES_EXHAUSTED.to_string()),
                    None,
                );
                if !token.is_cancelled() {
                    info!(channel = %kind, reason = RETRIES_EXHAUSTED, "channel failed");
                }
                return None;
            };

            let delay = self.inner.options.backoff.delay(attempt - 1);
            self.transition(token, ChannelStatus::Connecting, last_failure, Some(attempt));
            warn!(
                channel = %kind,
                attempt,
                max_retries = self.inner.options.max_retries,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );

            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            let connected = tokio::select! {
                _ = token.cancelled() => return None,
                connected = self.inner.connector.connect(endpoint) => connected,
            };

            match connected {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    if !self.install(token, write, Some(attempt)).await {
                        return None;
                    }
                    info!(channel = %kind, %endpoint, attempt, "channel reconnected");
                    return Some(FrameReader::with_config(
                        read,
                        kind,
                        self.inner.options.codec.clone(),
                    ));
                }
                Err(err) => {
                    let reason = err.reason();
                    debug!(channel = %kind, attempt, %reason, "reconnect attempt failed");
                    self.state().last_failure = Some(reason);
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
