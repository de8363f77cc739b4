// SPDX-License-Identifier: Apache-2.0

//! Turning raw file bytes into discrete messages.
//!
//! The tailer only depends on the [`Decoder`] trait: bytes go in, ordered
//! messages come out, each reporting how many input bytes it consumed. The
//! bundled [`LineDecoder`] frames on newlines and can optionally detect a
//! multi-line start pattern.

mod auto_multiline;
mod handle;
mod line;

use std::time::Duration;

use regex::Regex;

use crate::tailers::file::error::Result;

pub use auto_multiline::{AutoMultilineConfig, AutoMultilineDetector};
pub use handle::{DecoderHandle, DecoderTasks};
pub use line::LineDecoder;

/// One unit of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Message body. Empty for blank lines, which still consume bytes.
    pub content: Vec<u8>,
    /// Input bytes consumed by this message, including line terminators.
    pub raw_data_len: usize,
    /// The line was split because it exceeded the maximum message size.
    pub truncated: bool,
}

impl DecodedMessage {
    pub fn new(content: Vec<u8>, raw_data_len: usize, truncated: bool) -> Self {
        Self {
            content,
            raw_data_len,
            truncated,
        }
    }
}

pub trait Decoder: Send {
    /// Feed the next chunk of file bytes. An error skips this chunk only.
    fn push(&mut self, bytes: &[u8]) -> Result<()>;

    /// Pop the next decoded message, in input order.
    fn next_output(&mut self) -> Option<DecodedMessage>;

    /// End of input: emit everything still buffered, including an
    /// unterminated last line.
    fn flush(&mut self);

    /// Drop anything that is not a complete message yet. Returns the number
    /// of input bytes dropped.
    fn discard(&mut self) -> usize;

    /// Start pattern found by multi-line detection, once detection completed.
    fn detected_pattern(&self) -> Option<&Regex> {
        None
    }

    /// How long buffered, complete content may wait for more input before
    /// [`Decoder::flush_idle`] should be called. `None` when nothing waits.
    fn idle_flush_timeout(&self) -> Option<Duration> {
        None
    }

    /// Emit buffered complete content without touching a partial line.
    fn flush_idle(&mut self) {}
}
