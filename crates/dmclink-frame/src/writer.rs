use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_line, CodecConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes command lines to any `AsyncWrite` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Send one command line; the line terminator is appended.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        self.check_len(text.len())?;
        self.buf.clear();
        encode_line(text, &mut self.buf);
        self.inner.write_all(&self.buf).await?;
        self.flush().await
    }

    /// Send bytes exactly as given, for payloads that carry their own
    /// terminator (array downloads end in `\`).
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.check_len(payload.len())?;
        self.inner.write_all(payload).await?;
        self.flush().await
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await.map_err(FrameError::Io)
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(FrameError::Io)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check_len(&self, size: usize) -> Result<()> {
        if size > self.config.max_line_length {
            return Err(FrameError::LineTooLong {
                size,
                max: self.config.max_line_length,
            });
        }
        Ok(())
    }
}
