//! Outgoing byte buffer that survives partial writes

use std::io::{self, Write};

/// Outcome of a flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Every queued byte was handed to the writer
    Complete,
    /// The writer returned `WouldBlock`; retry on the next writable event
    Blocked,
}

/// Queue of bytes waiting to be written to a non-blocking socket
///
/// Offsets are cumulative over the buffer's lifetime, so a caller can note
/// `queued_total()` after pushing a message and later compare it against
/// `written_total()` to learn when that message has left the buffer.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    pos: usize,
    queued_total: u64,
    written_total: u64,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the end of the queue
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.queued_total += data.len() as u64;
    }

    /// Write as much as the writer accepts without blocking
    pub fn flush_to<W: Write>(&mut self, writer: &mut W) -> io::Result<FlushStatus> {
        while self.pos < self.buf.len() {
            match writer.write(&self.buf[self.pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pos += n;
                    self.written_total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(FlushStatus::Blocked),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.buf.clear();
        self.pos = 0;
        Ok(FlushStatus::Complete)
    }

    /// Bytes queued but not yet written
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn queued_total(&self) -> u64 {
        self.queued_total
    }

    pub fn written_total(&self) -> u64 {
        self.written_total
    }
}
