//! Line framing
//!
//! The panel terminates every line with a single CR. There is no length
//! prefix or checksum, so the reader guards against runaway frames with a
//! hard length ceiling and returns partial lines on timeout.

use std::io::{self, Read};

use super::{ProtocolError, MAX_LINE_LENGTH};

const CR: u8 = 0x0D;
const CHUNK_SIZE: usize = 64;

/// Result of one `read_line` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A CR-stripped line (possibly partial or truncated)
    Line(String),
    /// The transport timed out with nothing accumulated
    Timeout,
}

/// Splits a byte stream into CR-terminated lines
pub struct FrameReader<R> {
    inner: R,
    /// Bytes read past the last CR, consumed before touching `inner` again
    pending: Vec<u8>,
    max_len: usize,
}

impl<R: Read> FrameReader<R> {
    /// Create a reader with the default 100 byte ceiling
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, MAX_LINE_LENGTH)
    }

    /// Create a reader that cuts lines at `max_len` bytes
    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE),
            max_len: max_len.max(1),
        }
    }

    /// Read the next line
    ///
    /// Returns `Timeout` only when no byte at all arrived before the
    /// transport timeout. Undecodable bytes are replaced, never rejected.
    pub fn read_line(&mut self) -> Result<ReadOutcome, ProtocolError> {
        let mut line: Vec<u8> = Vec::new();

        loop {
            if let Some(outcome) = self.take_from_pending(&mut line) {
                return Ok(outcome);
            }

            let mut chunk = [0u8; CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    if !line.is_empty() {
                        return Ok(ReadOutcome::Line(decode(&line)));
                    }
                    return Err(ProtocolError::IoError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed",
                    )));
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => {
                    if line.is_empty() {
                        return Ok(ReadOutcome::Timeout);
                    }
                    tracing::debug!(
                        "read_line: timeout with {} bytes buffered, returning partial line",
                        line.len()
                    );
                    return Ok(ReadOutcome::Line(decode(&line)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::IoError(e)),
            }
        }
    }

    /// Move bytes from `pending` into `line` until a CR or the ceiling
    fn take_from_pending(&mut self, line: &mut Vec<u8>) -> Option<ReadOutcome> {
        let room = self.max_len - line.len();
        // A CR directly after a full-length line still terminates it normally
        let search = &self.pending[..self.pending.len().min(room + 1)];

        if let Some(pos) = search.iter().position(|&b| b == CR) {
            line.extend_from_slice(&self.pending[..pos]);
            self.pending.drain(..=pos);
            return Some(ReadOutcome::Line(decode(line)));
        }

        let taken = self.pending.len().min(room);
        line.extend_from_slice(&self.pending[..taken]);
        self.pending.drain(..taken);

        if line.len() >= self.max_len {
            tracing::warn!(
                "read_line: no CR within {} bytes, truncating frame {:?}",
                self.max_len,
                String::from_utf8_lossy(line)
            );
            return Some(ReadOutcome::Line(decode(line)));
        }
        None
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
