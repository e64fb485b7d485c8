//! Line and prompt framing for the controller's ASCII channels.
//!
//! The controller speaks unframed ASCII: response lines end in any run of
//! `\r`/`\n`, and the command prompts (`:` accepted, `?` rejected) arrive with
//! no terminator at all. This crate turns that byte stream into discrete
//! [`Frame`]s:
//! - line boundaries collapse, empty tokens are dropped
//! - a partial trailing line stays buffered until the rest arrives
//! - prompts are emitted on their own as soon as they are complete
//!
//! No partial reads, no buffer management in user code.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::ChannelKind;
pub use codec::{
    decode_line, encode_line, CodecConfig, Frame, LineCodec, PromptGate, PromptGateGuard, Sentinel,
    DEFAULT_MAX_LINE, ERROR_PROMPT, LINE_TERMINATOR, SUCCESS_PROMPT, UPLOAD_TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
