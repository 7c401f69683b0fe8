//! Newline codec for request and response lines
//!
//! Every message on the wire is a single line:
//! ```text
//! [ N bytes: UTF-8 text ][ \n ]
//! ```
//!
//! There is no length prefix. A `\r` before the newline is dropped.

use bytes::{Bytes, BufMut, BytesMut};
use thiserror::Error;

use crate::timing::MAX_LINE_BYTES;

/// Errors that can occur while decoding lines
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("Line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Encode text as one newline-terminated line
pub fn encode_line(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Streaming line decoder
#[derive(Debug)]
pub struct LineDecoder {
    buffer: BytesMut,
    max_line: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a decoder with the default line limit
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }

    /// Create a decoder that rejects lines longer than `max_line` bytes (newline included)
    pub fn with_limit(max_line: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_line,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next complete line
    ///
    /// Returns:
    /// - `Ok(Some(line))` if a newline-terminated line was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the pending line is over the limit or not UTF-8
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        match self.buffer.iter().position(|byte| *byte == b'\n') {
            Some(pos) => {
                self.check_limit(pos + 1)?;
                let line = self.buffer.split_to(pos + 1);
                into_text(&line[..pos]).map(Some)
            }
            None => {
                self.check_limit(self.buffer.len())?;
                Ok(None)
            }
        }
    }

    /// Drain the unterminated tail once the peer has closed the stream
    ///
    /// Returns `Ok(None)` if nothing is buffered.
    pub fn finish(&mut self) -> Result<Option<String>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let rest = self.buffer.split();
        into_text(&rest).map(Some)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    fn check_limit(&self, len: usize) -> Result<(), CodecError> {
        if len > self.max_line {
            return Err(CodecError::LineTooLong {
                len,
                max: self.max_line,
            });
        }
        Ok(())
    }
}

fn into_text(bytes: &[u8]) -> Result<String, CodecError> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    Ok(String::from_utf8(bytes.to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_line() {
        let encoded = encode_line("pong");
        assert_eq!(&encoded[..], b"pong\n");
    }

    #[test]
    fn test_partial_line() {
        let mut decoder = LineDecoder::new();

        decoder.extend(b"{\"executorID\":");
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffer_len(), 14);

        decoder.extend(b"\"e1\"}\n");
        let line = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have line");
        assert_eq!(line, "{\"executorID\":\"e1\"}");
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"first\r\nsecond\n");

        assert_eq!(decoder.decode_next().expect("decode error").as_deref(), Some("first"));
        assert_eq!(decoder.decode_next().expect("decode error").as_deref(), Some("second"));
        assert!(decoder.decode_next().expect("decode error").is_none());
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = LineDecoder::with_limit(8);
        decoder.extend(b"123456789");

        let result = decoder.decode_next();
        assert!(matches!(result, Err(CodecError::LineTooLong { len: 9, max: 8 })));
    }

    #[test]
    fn test_line_at_limit() {
        let mut decoder = LineDecoder::with_limit(8);
        decoder.extend(b"1234567\n");
        assert_eq!(decoder.decode_next().expect("decode error").as_deref(), Some("1234567"));
    }

    #[test]
    fn test_finish_returns_unterminated_tail() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.finish().expect("finish error").is_none());

        decoder.extend(b"no newline");
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.finish().expect("finish error").as_deref(), Some("no newline"));
        assert!(decoder.finish().expect("finish error").is_none());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&[0xff, 0xfe, b'\n']);
        assert!(matches!(decoder.decode_next(), Err(CodecError::InvalidUtf8(_))));
    }
}
