//! rceload Transport Layer
//!
//! Non-blocking socket primitives built on mio. Nothing in this crate ever
//! blocks the calling thread: connection establishment, writes and reads
//! report readiness back to the caller, which owns the `mio::Poll` and decides
//! when to retry.
//!
//! ## Available Senders
//!
//! - **TCP**: `TcpSender`, a stream connection with an owned write buffer so
//!   partial writes resume on the next writable notification
//! - **UDP**: `UdpSender`, one datagram per message
//!
//! Many senders can share one `mio::Poll`; each is registered under its own
//! `Token`.
//!
//! ```rust,no_run
//! use mio::{Events, Interest, Poll, Token};
//! use rceload_transport::TcpSender;
//!
//! let mut poll = Poll::new().unwrap();
//! let addr = "127.0.0.1:7000".parse().unwrap();
//! let mut sender =
//!     TcpSender::connect(poll.registry(), Token(0), addr, Interest::WRITABLE).unwrap();
//! sender.queue(b"payload");
//!
//! let mut events = Events::with_capacity(16);
//! while sender.has_pending() {
//!     poll.poll(&mut events, None).unwrap();
//!     for event in events.iter() {
//!         if event.is_writable() {
//!             sender.on_writable().unwrap();
//!             sender.flush().unwrap();
//!         }
//!     }
//! }
//! ```

use std::fmt;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer error types
#[derive(Debug)]
pub enum Error {
    /// I/O errors from transport layer
    Io(std::io::Error),

    /// Connection errors
    Connection(String),

    /// Configuration errors
    Config(String),

    /// Other errors
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

pub mod buffer;
pub mod tcp;
pub mod udp;

pub use buffer::{FlushStatus, WriteBuffer};
pub use tcp::{ReadStatus, TcpSender};
pub use udp::{SendStatus, UdpSender, MAX_DATAGRAM_SIZE};
