//! RecordIO framing: `<decimal length>\n<payload>` repeated.
//!
//! The decoder accepts chunks with arbitrary boundaries (a chunk may hold a
//! partial length prefix, several records, or a fraction of one record).

use bytes::{Buf, Bytes, BytesMut};

use crate::MesosError;

/// Longest accepted length prefix, in digits.
const MAX_PREFIX_DIGITS: usize = 20;

/// Default upper bound for a single record.
pub const DEFAULT_MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Incremental RecordIO decoder.
#[derive(Debug)]
pub struct RecordIoDecoder {
    buf: BytesMut,
    pending_len: Option<usize>,
    max_record_len: usize,
}

impl Default for RecordIoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordIoDecoder {
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            pending_len: None,
            max_record_len,
        }
    }

    /// Appends a chunk read from the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as a record.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete record, `Ok(None)` if more input is needed.
    ///
    /// A framing error leaves the decoder in an unusable state; the stream
    /// must be abandoned.
    pub fn next_record(&mut self) -> Result<Option<Bytes>, MesosError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => match self.read_prefix()? {
                Some(len) => {
                    self.pending_len = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if self.buf.len() < len {
            return Ok(None);
        }

        self.pending_len = None;
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    fn read_prefix(&mut self) -> Result<Option<usize>, MesosError> {
        let Some(newline) = self.buf.iter().position(|b| *b == b'\n') else {
            if self.buf.len() > MAX_PREFIX_DIGITS {
                return Err(MesosError::Framing(prefix_preview(&self.buf)));
            }
            return Ok(None);
        };

        let prefix = &self.buf[..newline];
        if prefix.is_empty()
            || prefix.len() > MAX_PREFIX_DIGITS
            || !prefix.iter().all(u8::is_ascii_digit)
        {
            return Err(MesosError::Framing(prefix_preview(prefix)));
        }

        // All ASCII digits, at most 20 of them: parse only fails on overflow.
        let len = std::str::from_utf8(prefix)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| MesosError::Framing(prefix_preview(prefix)))?;

        if len > self.max_record_len {
            return Err(MesosError::RecordTooLarge {
                len,
                limit: self.max_record_len,
            });
        }

        self.buf.advance(newline + 1);
        Ok(Some(len))
    }
}

fn prefix_preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_PREFIX_DIGITS + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
