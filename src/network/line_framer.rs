//! Incremental CRLF line framing for one socket direction.

use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 16 * 1024;

/// Splits a byte stream into CRLF-terminated lines.
///
/// Each framer owns the read half of one socket and buffers the trailing
/// partial line between reads. Lines are returned with their terminator so
/// the proxy can relay them byte for byte. There is no length limit; a
/// stalled or abusive peer is bounded by timeouts at the protocol layer.
///
/// [`LineFramer::next_line`] is cancel safe: the only await point is a single
/// `read`, and buffered bytes live in the framer, so it can sit in a
/// `tokio::select!` branch without losing data.
pub struct LineFramer<R> {
    reader: R,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            chunk: vec![0u8; READ_CHUNK],
            eof: false,
        }
    }

    /// Returns the next complete line, terminator included.
    ///
    /// At end of stream a trailing unterminated fragment is returned once as
    /// a final line; after that `Ok(None)` signals the peer closed its side.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&self.chunk[..n]);
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.windows(2).position(|w| w == b"\r\n")? + 2;
        let rest = self.buffer.split_off(end);
        Some(std::mem::replace(&mut self.buffer, rest))
    }
}
