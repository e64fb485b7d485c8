use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::channel::ChannelKind;
use crate::error::{FrameError, Result};

/// Prompt sent when a command is accepted.
pub const SUCCESS_PROMPT: &str = ":";

/// Prompt sent when a command is rejected.
pub const ERROR_PROMPT: &str = "?";

/// Marks the end of an array upload: control-Z followed by the success prompt.
pub const UPLOAD_TERMINATOR: &str = "\x1a:";

/// Terminator appended to every command line.
pub const LINE_TERMINATOR: &str = "\r";

/// Default maximum length of a single line: 64 KiB.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Longest prompt first so `\x1a:` wins over `:`.
const PROMPTS: [&[u8]; 3] = [
    UPLOAD_TERMINATOR.as_bytes(),
    SUCCESS_PROMPT.as_bytes(),
    ERROR_PROMPT.as_bytes(),
];

/// What a frame means to a command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// `:`: the command was accepted.
    Success,
    /// `?`: the command was rejected.
    Error,
    /// `\x1a:`: end of an array upload.
    UploadEnd,
}

/// A decoded line from one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this line arrived on.
    pub channel: ChannelKind,
    /// Position within the channel's stream, assigned by the receiver.
    pub seq: u64,
    /// Line text, without its boundary.
    pub text: String,
    /// When the line was decoded.
    pub received_at: SystemTime,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(channel: ChannelKind, text: impl Into<String>) -> Self {
        Self {
            channel,
            seq: 0,
            text: text.into(),
            received_at: SystemTime::now(),
        }
    }

    /// Set the sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Text with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }

    /// Classify the frame as a sentinel, if it is one.
    pub fn sentinel(&self) -> Option<Sentinel> {
        match self.trimmed() {
            SUCCESS_PROMPT => Some(Sentinel::Success),
            ERROR_PROMPT => Some(Sentinel::Error),
            UPLOAD_TERMINATOR => Some(Sentinel::UploadEnd),
            _ => None,
        }
    }

    /// Receipt time as milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> u64 {
        self.received_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Shared switch that limits unterminated prompt recognition to the
/// moments a caller is actually waiting for one.
///
/// Clones share state, so the reader's codec and the code issuing the
/// request see the same switch. While closed, a prompt character is only a
/// prompt when a line boundary follows it, so decoding no longer depends on
/// where the stream was split.
#[derive(Debug, Clone, Default)]
pub struct PromptGate(Arc<AtomicBool>);

impl PromptGate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Open the gate until the returned guard is dropped.
    pub fn open(&self) -> PromptGateGuard {
        self.0.store(true, Ordering::Release);
        PromptGateGuard(self.clone())
    }
}

/// Closes its [`PromptGate`] on drop.
#[derive(Debug)]
pub struct PromptGateGuard(PromptGate);

impl Drop for PromptGateGuard {
    fn drop(&mut self) {
        (self.0).0.store(false, Ordering::Release);
    }
}

/// Configuration for the line codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum bytes buffered for one line. Default: 64 KiB.
    pub max_line_length: usize,
    /// Emit unterminated prompts as soon as they are complete.
    pub recognize_prompts: bool,
    /// When set, unterminated prompts are recognized only while it is open.
    pub prompt_gate: Option<PromptGate>,
}

impl CodecConfig {
    fn eager_prompts(&self) -> bool {
        self.recognize_prompts && self.prompt_gate.as_ref().is_none_or(PromptGate::is_open)
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE,
            recognize_prompts: true,
            prompt_gate: None,
        }
    }
}

fn is_boundary(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

enum PromptMatch {
    Complete(usize),
    Partial,
    None,
}

fn match_prompt(src: &[u8]) -> PromptMatch {
    let mut partial = false;
    for prompt in PROMPTS {
        if src.len() >= prompt.len() {
            if src.starts_with(prompt)
                && (src.len() == prompt.len() || is_boundary(src[prompt.len()]))
            {
                return PromptMatch::Complete(prompt.len());
            }
        } else if prompt.starts_with(src) {
            partial = true;
        }
    }
    if partial {
        PromptMatch::Partial
    } else {
        PromptMatch::None
    }
}

/// Decode the next line from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
/// Any run of `\r`/`\n` is one boundary, so empty lines never surface.
/// On success, consumes the line bytes from the buffer; the boundary after
/// it is consumed on the next call.
pub fn decode_line(src: &mut BytesMut, config: &CodecConfig) -> Result<Option<String>> {
    let leading = src.iter().take_while(|b| is_boundary(**b)).count();
    src.advance(leading);

    if src.is_empty() {
        return Ok(None);
    }

    if config.eager_prompts() {
        match match_prompt(src) {
            PromptMatch::Complete(len) => {
                let prompt = src.split_to(len);
                return Ok(Some(String::from_utf8_lossy(&prompt).into_owned()));
            }
            PromptMatch::Partial => return Ok(None),
            PromptMatch::None => {}
        }
    }

    match src.iter().position(|b| is_boundary(*b)) {
        Some(end) => {
            let line = src.split_to(end);
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        }
        None if src.len() > config.max_line_length => Err(FrameError::LineTooLong {
            size: src.len(),
            max: config.max_line_length,
        }),
        None => Ok(None), // Need more data
    }
}

/// Encode a command line into the wire format: the text followed by `\r`.
pub fn encode_line(text: &str, dst: &mut BytesMut) {
    dst.reserve(text.len() + LINE_TERMINATOR.len());
    dst.put_slice(text.as_bytes());
    dst.put_slice(LINE_TERMINATOR.as_bytes());
}

/// `tokio_util` codec over [`decode_line`] and [`encode_line`].
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    config: CodecConfig,
}

impl LineCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Toggle prompt recognition.
    pub fn with_prompts(mut self, recognize: bool) -> Self {
        self.config.recognize_prompts = recognize;
        self
    }

    /// Current codec configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        decode_line(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            debug!(
                bytes = src.len(),
                "discarding unterminated fragment at end of stream"
            );
            src.clear();
        }
        Ok(None)
    }
}

impl<'a> Encoder<&'a str> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.config.max_line_length {
            return Err(FrameError::LineTooLong {
                size: item.len(),
                max: self.config.max_line_length,
            });
        }
        encode_line(item, dst);
        Ok(())
    }
}
