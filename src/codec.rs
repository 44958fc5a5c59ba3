//! Line codec for the relay protocol
//!
//! Input: lines up to `\n`, an optional trailing `\r` stripped. Bytes that
//! are not valid UTF-8 are replaced with U+FFFD instead of failing the line.
//! Output: every line terminated with `\r\n`.
//!
//! An over-long input line is yielded as [`Inbound::Oversized`] rather than
//! an error: a decoder error pauses `FramedRead`, and the connection should
//! survive a single bad line.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::error::CodecError;

/// Default maximum accepted input line length in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// One decoded unit of client input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Line(String),
    /// A line longer than the limit was discarded up to its newline
    Oversized,
}

#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_length),
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map(result: Result<Option<Bytes>, AnyDelimiterCodecError>) -> Result<Option<Inbound>, CodecError> {
        match result {
            Ok(chunk) => Ok(chunk.map(|chunk| Inbound::Line(to_line(&chunk)))),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Inbound::Oversized)),
            Err(AnyDelimiterCodecError::Io(e)) => Err(CodecError::Io(e)),
        }
    }
}

fn to_line(chunk: &[u8]) -> String {
    let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    String::from_utf8_lossy(chunk).into_owned()
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        Self::map(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        Self::map(self.inner.decode_eof(src))
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
