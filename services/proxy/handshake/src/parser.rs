//! Byte-at-a-time parser for the outbound bootstrap handshake.
//!
//! A device that dials in sends a short block of `KEY: VALUE` lines before
//! the management session starts. The parser consumes at most three lines
//! (CRLF or LF terminated) and gives up early if a single line grows to
//! [`MAX_LINE_BYTES`] without a terminator.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::error::HandshakeError;
use crate::record::HandshakeRecord;

/// Number of header lines consumed before the handshake is complete
pub const HANDSHAKE_LINES: u8 = 3;

/// Cap on bytes buffered for a single unterminated line
pub const MAX_LINE_BYTES: usize = 100;

const KEY_SEPARATOR: &str = ": ";

/// Result of feeding one byte to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More input is required
    NeedMore,
    /// Line budget exhausted or line cap reached; stop reading
    Complete,
}

/// Push parser for handshake headers
#[derive(Debug)]
pub struct HandshakeParser {
    record: HandshakeRecord,
    line: BytesMut,
    remaining_lines: u8,
    consumed: usize,
}

impl Default for HandshakeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeParser {
    /// Create a parser expecting [`HANDSHAKE_LINES`] lines
    pub fn new() -> Self {
        Self {
            record: HandshakeRecord::new(),
            line: BytesMut::with_capacity(MAX_LINE_BYTES),
            remaining_lines: HANDSHAKE_LINES,
            consumed: 0,
        }
    }

    /// Feed a single byte.
    ///
    /// Calling `push` after [`ParseStatus::Complete`] has been returned keeps
    /// returning `Complete` without consuming the byte.
    pub fn push(&mut self, byte: u8) -> ParseStatus {
        if self.is_complete() {
            return ParseStatus::Complete;
        }
        self.consumed += 1;

        match byte {
            b'\r' => {}
            b'\n' => {
                self.remaining_lines -= 1;
                self.finish_line();
            }
            _ => self.line.extend_from_slice(&[byte]),
        }

        if self.is_complete() {
            ParseStatus::Complete
        } else {
            ParseStatus::NeedMore
        }
    }

    /// Whether the parser has stopped accepting input
    pub fn is_complete(&self) -> bool {
        self.remaining_lines == 0 || self.line.len() >= MAX_LINE_BYTES
    }

    /// Total bytes consumed so far, including line terminators
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Headers parsed so far
    pub fn record(&self) -> &HandshakeRecord {
        &self.record
    }

    /// Consume the parser and return the headers parsed so far.
    ///
    /// An unterminated trailing line is discarded.
    pub fn finish(self) -> HandshakeRecord {
        self.record
    }

    fn finish_line(&mut self) {
        let line = self.line.split();
        let text = String::from_utf8_lossy(&line);

        // Lines without a separator are dropped silently
        if let Some((key, value)) = text.split_once(KEY_SEPARATOR) {
            self.record.set(key, value.to_string());
        } else {
            trace!("Discarding handshake line without separator: {:?}", text);
        }
    }
}

/// Read the handshake from `reader`, one byte per read call.
///
/// Reading byte by byte guarantees nothing past the last header line is
/// pulled out of the socket, so the remaining stream is left intact for the
/// process that takes over the descriptor.
pub async fn read_handshake<R>(reader: &mut R) -> Result<HandshakeRecord, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut parser = HandshakeParser::new();

    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(HandshakeError::ConnectionClosed {
                    consumed: parser.consumed(),
                });
            }
            Err(e) => return Err(HandshakeError::Io(e)),
        };

        if parser.push(byte) == ParseStatus::Complete {
            break;
        }
    }

    debug!("Handshake complete after {} bytes", parser.consumed());
    Ok(parser.finish())
}
