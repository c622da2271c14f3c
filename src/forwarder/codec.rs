//! Line framing for the worker's stdout and stderr.
//!
//! The worker's output is free text in whatever encoding the interpreter
//! uses, so lines are decoded lossily instead of failing the stream. A line
//! longer than [`MAX_LINE_BYTES`] is emitted in chunks of that size.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::AppError;

/// Longest line emitted as a single item: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited, lossy UTF-8 decoder with a maximum line length.
///
/// Trailing whitespace, including `\r`, is trimmed from every line.
#[derive(Debug)]
pub struct LogLineCodec {
    max_length: usize,
    /// Bytes already scanned for a newline in the current buffer.
    next_index: usize,
}

impl LogLineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that splits lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
        }
    }
}

impl Default for LogLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LogLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let scan_end = src.len().min(self.max_length);
        let newline = src[self.next_index.min(scan_end)..scan_end]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| offset + self.next_index.min(scan_end));

        if let Some(end) = newline {
            self.next_index = 0;
            let line = src.split_to(end + 1);
            return Ok(Some(to_text(&line[..end])));
        }

        if src.len() >= self.max_length {
            self.next_index = 0;
            let chunk = src.split_to(self.max_length);
            return Ok(Some(to_text(&chunk)));
        }

        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = src.split_to(src.len());
        Ok(Some(to_text(&rest)))
    }
}

fn to_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_owned()
}
