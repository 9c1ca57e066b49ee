//! rceload Core Library
//!
//! Synthetic event generation and dispatch for load-testing an event
//! ingestion service: the distribution engine (`workload`), the socket, UDP
//! and HTTP dispatchers (`dispatch`), delivery statistics (`stats`), run
//! cancellation, seed derivation and the threading runtime.

pub mod cancel;
pub mod dispatch;
pub mod error;
pub mod seed;
pub mod stats;
pub mod threading;
pub mod timing;
pub mod workload;

pub use cancel::CancellationToken;
pub use dispatch::{DeliveryOutcome, ErrorKind, OutcomeRecorder};
pub use error::{Error, Result};
pub use workload::{generate, DistributionSpec, EventCount, EventGenerator, SyntheticDataset};
