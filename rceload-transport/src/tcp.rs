//! TCP sender using non-blocking I/O with mio

use crate::buffer::{FlushStatus, WriteBuffer};
use crate::{Error, Result};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectState {
    Connecting,
    Connected,
}

/// Result of draining the read side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadStatus {
    pub bytes: usize,
    pub eof: bool,
}

/// Non-blocking TCP connection registered with a caller-owned `mio::Poll`
///
/// `connect` returns immediately; the connection is established once
/// `on_writable` reports it. Queued bytes are held in a `WriteBuffer` and
/// written whenever the socket accepts them.
pub struct TcpSender {
    stream: TcpStream,
    target: SocketAddr,
    state: ConnectState,
    writable: bool,
    write_buf: WriteBuffer,
    recv_buf: Box<[u8]>,
}

impl TcpSender {
    /// Start a non-blocking connect and register the stream under `token`
    pub fn connect(
        registry: &Registry,
        token: Token,
        target: SocketAddr,
        interest: Interest,
    ) -> Result<Self> {
        let mut stream = TcpStream::connect(target)?;
        registry.register(&mut stream, token, interest | Interest::WRITABLE)?;

        Ok(Self {
            stream,
            target,
            state: ConnectState::Connecting,
            writable: false,
            write_buf: WriteBuffer::new(),
            recv_buf: vec![0u8; 8192].into_boxed_slice(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectState::Connected
    }

    /// Handle a writable notification
    ///
    /// Returns `true` the first time the pending connect is confirmed.
    pub fn on_writable(&mut self) -> Result<bool> {
        self.writable = true;
        if self.state == ConnectState::Connected {
            return Ok(false);
        }

        if let Some(err) = self.stream.take_error()? {
            return Err(Error::Connection(format!("Connection to {} failed: {err}", self.target)));
        }

        match self.stream.peer_addr() {
            Ok(_) => {
                self.state = ConnectState::Connected;
                if let Err(e) = self.stream.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY on {}: {}", self.target, e);
                }
                tracing::trace!("Connected to {}", self.target);
                Ok(true)
            }
            // Spurious wakeup, connect still in progress
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                self.writable = false;
                Ok(false)
            }
            Err(e) => {
                Err(Error::Connection(format!("Connection to {} failed: {e}", self.target)))
            }
        }
    }

    /// Queue bytes for sending
    pub fn queue(&mut self, data: &[u8]) {
        self.write_buf.push(data);
    }

    /// Write queued bytes until done or the socket blocks
    pub fn flush(&mut self) -> Result<FlushStatus> {
        if !self.is_connected() || !self.writable {
            return Ok(if self.write_buf.is_empty() {
                FlushStatus::Complete
            } else {
                FlushStatus::Blocked
            });
        }

        let status = self.write_buf.flush_to(&mut self.stream)?;
        if status == FlushStatus::Blocked {
            self.writable = false;
        }
        Ok(status)
    }

    pub fn has_pending(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Cumulative offset of the last byte queued
    pub fn queued_total(&self) -> u64 {
        self.write_buf.queued_total()
    }

    /// Cumulative offset of the last byte written to the socket
    pub fn written_total(&self) -> u64 {
        self.write_buf.written_total()
    }

    /// Read everything currently available into `out`
    pub fn read_available(&mut self, out: &mut Vec<u8>) -> Result<ReadStatus> {
        let mut status = ReadStatus::default();
        loop {
            match self.stream.read(&mut self.recv_buf) {
                Ok(0) => {
                    status.eof = true;
                    return Ok(status);
                }
                Ok(n) => {
                    out.extend_from_slice(&self.recv_buf[..n]);
                    status.bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(status),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Deregister and drop the connection
    pub fn close(mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            tracing::debug!("Failed to deregister {}: {}", self.target, e);
        }
    }
}
