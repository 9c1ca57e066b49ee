//! Delivery statistics collection

use crate::dispatch::{DeliveryOutcome, ErrorKind, OutcomeRecorder};
use crate::{Error, Result};
use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::time::Duration;

/// Significant figures kept by the latency histogram
const HISTOGRAM_SIGFIGS: u8 = 3;

/// Aggregated outcomes of one worker or a whole run
///
/// Latencies are recorded in microseconds. Collectors from different
/// threads are combined with `merge`.
#[derive(Debug, Clone)]
pub struct DeliveryStats {
    attempted: u64,
    succeeded: u64,
    errors: BTreeMap<ErrorKind, u64>,
    bytes_sent: u64,
    latency_us: Histogram<u64>,
}

impl DeliveryStats {
    pub fn new() -> Result<Self> {
        let latency_us = Histogram::<u64>::new(HISTOGRAM_SIGFIGS)
            .map_err(|e| Error::Other(format!("Failed to create latency histogram: {e}")))?;

        Ok(Self {
            attempted: 0,
            succeeded: 0,
            errors: BTreeMap::new(),
            bytes_sent: 0,
            latency_us,
        })
    }

    pub fn record_outcome(&mut self, outcome: &DeliveryOutcome) {
        self.attempted += 1;
        self.bytes_sent += outcome.bytes as u64;

        if outcome.success {
            self.succeeded += 1;
        } else {
            let kind = outcome.error_kind.unwrap_or(ErrorKind::ConnectionFailure);
            *self.errors.entry(kind).or_insert(0) += 1;
        }

        if let Some(latency) = outcome.latency {
            self.record_latency(latency);
        }
    }

    pub fn record_latency(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_us.saturating_record(micros.max(1));
    }

    /// Fold `other` into `self`
    pub fn merge(&mut self, other: &DeliveryStats) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.bytes_sent += other.bytes_sent;
        for (kind, count) in &other.errors {
            *self.errors.entry(*kind).or_insert(0) += count;
        }
        if let Err(e) = self.latency_us.add(&other.latency_us) {
            tracing::warn!("Dropped latency samples while merging statistics: {}", e);
        }
    }

    pub fn attempted(&self) -> u64 {
        self.attempted
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded
    }

    pub fn failed(&self) -> u64 {
        self.attempted - self.succeeded
    }

    /// Failures of one kind
    pub fn errors(&self, kind: ErrorKind) -> u64 {
        self.errors.get(&kind).copied().unwrap_or(0)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn latency_count(&self) -> u64 {
        self.latency_us.len()
    }

    /// Latency at `quantile` in `[0, 1]`, `None` without samples
    pub fn latency_quantile(&self, quantile: f64) -> Option<Duration> {
        if self.latency_us.is_empty() {
            return None;
        }
        Some(Duration::from_micros(self.latency_us.value_at_quantile(quantile)))
    }

    pub fn latency_mean(&self) -> Option<Duration> {
        if self.latency_us.is_empty() {
            return None;
        }
        Some(Duration::from_secs_f64(self.latency_us.mean() / 1_000_000.0))
    }

    pub fn latency_max(&self) -> Option<Duration> {
        if self.latency_us.is_empty() {
            return None;
        }
        Some(Duration::from_micros(self.latency_us.max()))
    }
}

impl OutcomeRecorder for DeliveryStats {
    fn record(&mut self, outcome: DeliveryOutcome) {
        if !outcome.success {
            tracing::trace!(
                "Client {} event {} failed: {:?}",
                outcome.client_id,
                outcome.event_index,
                outcome.error_kind
            );
        }
        self.record_outcome(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(latency_us: u64) -> DeliveryOutcome {
        DeliveryOutcome::succeeded(0, 0, Duration::from_micros(latency_us), 88)
    }

    #[test]
    fn test_new_collector() {
        let stats = DeliveryStats::new().unwrap();
        assert_eq!(stats.attempted(), 0);
        assert_eq!(stats.failed(), 0);
        assert_eq!(stats.latency_quantile(0.5), None);
        assert_eq!(stats.latency_mean(), None);
    }

    #[test]
    fn test_counts_by_kind() {
        let mut stats = DeliveryStats::new().unwrap();
        stats.record(ok(100));
        stats.record(DeliveryOutcome::failed(0, 1, ErrorKind::ResponseMismatch, 88));
        stats.record(DeliveryOutcome::failed(0, 2, ErrorKind::ResponseMismatch, 88));
        stats.record(DeliveryOutcome::failed(0, 3, ErrorKind::ConnectionFailure, 88));

        assert_eq!(stats.attempted(), 4);
        assert_eq!(stats.succeeded(), 1);
        assert_eq!(stats.failed(), 3);
        assert_eq!(stats.errors(ErrorKind::ResponseMismatch), 2);
        assert_eq!(stats.errors(ErrorKind::ConnectionFailure), 1);
        assert_eq!(stats.errors(ErrorKind::Cancelled), 0);
        assert_eq!(stats.bytes_sent(), 4 * 88);
        assert_eq!(stats.latency_count(), 1);
    }

    #[test]
    fn test_latency_quantiles() {
        let mut stats = DeliveryStats::new().unwrap();
        for us in 1..=1000 {
            stats.record(ok(us));
        }

        let p50 = stats.latency_quantile(0.5).unwrap().as_micros() as i64;
        let p99 = stats.latency_quantile(0.99).unwrap().as_micros() as i64;
        assert!((p50 - 500).abs() <= 5, "p50 {p50}");
        assert!((p99 - 990).abs() <= 5, "p99 {p99}");
        assert_eq!(stats.latency_max().unwrap().as_micros(), 1000);
    }

    #[test]
    fn test_merge() {
        let mut a = DeliveryStats::new().unwrap();
        let mut b = DeliveryStats::new().unwrap();
        a.record(ok(10));
        b.record(ok(20));
        b.record(DeliveryOutcome::failed(1, 0, ErrorKind::Cancelled, 0));

        a.merge(&b);
        assert_eq!(a.attempted(), 3);
        assert_eq!(a.succeeded(), 2);
        assert_eq!(a.errors(ErrorKind::Cancelled), 1);
        assert_eq!(a.latency_count(), 2);
    }
}
