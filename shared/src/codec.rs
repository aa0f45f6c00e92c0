//! Line codec for the store's event stream
//!
//! The subscription body is a `text/event-stream`:
//! ```text
//! event: put
//! data: {"path":"/","data":{...}}
//!
//! event: keep-alive
//! data: null
//! ```
//!
//! Bytes arrive in arbitrary chunks, so lines are reassembled here before
//! they are classified.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Default longest accepted line (16 MiB). A full pending-queue snapshot
/// arrives as a single `data:` line.
pub const MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Errors that can occur while splitting the stream into lines
///
/// Both drop the offending line only; the decoder stays usable.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line of {len}+ bytes exceeds the {max} byte limit, dropped")]
    LineTooLong { len: usize, max: usize },

    #[error("Line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Reassembles terminated lines from a chunked byte stream
#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes of the line currently being accumulated
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no terminator
    scanned: usize,
    max_line: usize,
    /// Discarding the remainder of an oversized line
    skipping: bool,
}

impl LineDecoder {
    /// Create a new line decoder with the default line limit
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }

    /// Create a decoder that drops lines longer than `max_line` bytes
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            max_line,
            skipping: false,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next terminated line, without its `\n` or `\r\n`
    ///
    /// Returns `Ok(None)` when no complete line is buffered. A trailing
    /// fragment left when the stream ends is never returned. An oversized
    /// line is reported once, however it was chunked, and its bytes are
    /// discarded up to the next terminator.
    pub fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        loop {
            let found = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n');

            let Some(offset) = found else {
                let len = self.buffer.len();
                if self.skipping {
                    self.buffer.clear();
                    self.scanned = 0;
                } else if len > self.max_line {
                    self.buffer.clear();
                    self.scanned = 0;
                    self.skipping = true;
                    return Err(CodecError::LineTooLong {
                        len,
                        max: self.max_line,
                    });
                } else {
                    self.scanned = len;
                }
                return Ok(None);
            };

            let mut line = self.buffer.split_to(self.scanned + offset);
            self.buffer.advance(1);
            self.scanned = 0;

            if self.skipping {
                self.skipping = false;
                continue;
            }

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.len() > self.max_line {
                return Err(CodecError::LineTooLong {
                    len: line.len(),
                    max: self.max_line,
                });
            }

            return Ok(Some(String::from_utf8(line.to_vec())?));
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A classified event-stream line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `event: <name>`
    Event(String),
    /// `data: <payload>`
    Data(String),
    /// `: comment`
    Comment,
    /// Empty line, terminates an event
    Blank,
    /// Any other field (`id:`, `retry:`, ...)
    Other,
}

/// Classify one line of the event stream
pub fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim().to_string());
    }
    SseLine::Other
}
