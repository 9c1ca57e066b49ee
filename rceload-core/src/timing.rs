//! Monotonic nanosecond timestamps shared by the schedulers

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Global start time for monotonic nanosecond timestamps
static START: OnceLock<Instant> = OnceLock::new();

/// Current time in nanoseconds since the first call in this process
#[inline]
pub fn time_ns() -> u64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Saturating conversion of a duration to nanoseconds
#[inline]
pub fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
