use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::channel::ChannelKind;
use crate::codec::{CodecConfig, Frame, LineCodec};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally: callers always get complete lines, and
/// each reader numbers its frames from zero. A new connection gets a new
/// reader, so decoding restarts cleanly per connection.
pub struct FrameReader<T> {
    inner: FramedRead<T, LineCodec>,
    channel: ChannelKind,
    next_seq: u64,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T, channel: ChannelKind) -> Self {
        Self::with_config(inner, channel, CodecConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, channel: ChannelKind, config: CodecConfig) -> Self {
        Self {
            inner: FramedRead::with_capacity(
                inner,
                LineCodec::with_config(config),
                INITIAL_BUFFER_CAPACITY,
            ),
            channel,
            next_seq: 0,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.inner.next().await {
            Some(Ok(text)) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                Ok(Frame::new(self.channel, text).with_seq(seq))
            }
            Some(Err(err)) => Err(err),
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// The channel frames are attributed to.
    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
