//! Event dispatchers
//!
//! Every dispatched event yields exactly one `DeliveryOutcome`, handed to an
//! `OutcomeRecorder`. Delivery failures never abort a run; they are
//! recorded, logged, and the client moves on to its next event.
//!
//! - `socket`: TCP stream of wire messages, many clients per poller thread
//! - `udp`: one datagram per wire message
//! - `http`: one blocking request per event, one client per worker thread

pub mod http;
pub mod ready_heap;
pub mod socket;
pub mod udp;

pub use http::{HttpConfig, HttpDispatcher};
pub use ready_heap::ReadyHeap;
pub use socket::{dispatch, SocketConfig, SocketDispatcher};
pub use udp::{UdpConfig, UdpDispatcher};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket-level failure: connect, reset, write error or timeout
    ConnectionFailure,
    /// HTTP connect, I/O or framing failure
    HttpTransportError,
    /// Response received but not the expected one
    ResponseMismatch,
    /// Event was in flight when the run was cancelled
    Cancelled,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::ConnectionFailure,
        ErrorKind::HttpTransportError,
        ErrorKind::ResponseMismatch,
        ErrorKind::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailure => "connection_failure",
            ErrorKind::HttpTransportError => "http_transport_error",
            ErrorKind::ResponseMismatch => "response_mismatch",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub client_id: usize,
    /// Position of the event in its client's stream
    pub event_index: u64,
    pub success: bool,
    pub latency: Option<Duration>,
    pub error_kind: Option<ErrorKind>,
    /// Wire bytes handed to the transport for this event
    pub bytes: usize,
}

impl DeliveryOutcome {
    pub fn succeeded(client_id: usize, event_index: u64, latency: Duration, bytes: usize) -> Self {
        Self {
            client_id,
            event_index,
            success: true,
            latency: Some(latency),
            error_kind: None,
            bytes,
        }
    }

    pub fn failed(client_id: usize, event_index: u64, kind: ErrorKind, bytes: usize) -> Self {
        Self {
            client_id,
            event_index,
            success: false,
            latency: None,
            error_kind: Some(kind),
            bytes,
        }
    }
}

/// Sink for delivery outcomes
pub trait OutcomeRecorder {
    fn record(&mut self, outcome: DeliveryOutcome);
}

impl OutcomeRecorder for Vec<DeliveryOutcome> {
    fn record(&mut self, outcome: DeliveryOutcome) {
        self.push(outcome);
    }
}

impl<R: OutcomeRecorder + ?Sized> OutcomeRecorder for &mut R {
    fn record(&mut self, outcome: DeliveryOutcome) {
        (**self).record(outcome);
    }
}

/// Upper bound on a single poll wait, so deadlines and cancellation are
/// noticed even without a wakeup
pub(crate) const MAX_POLL_WAIT: Duration = Duration::from_millis(100);
