//! Run summaries

use super::{DeliveryStats, LatencySummary, RunSummary};
use crate::dispatch::ErrorKind;
use std::time::Duration;

/// Summarize merged statistics of a run that took `elapsed`
pub fn summarize(stats: &DeliveryStats, elapsed: Duration) -> RunSummary {
    let errors = ErrorKind::ALL
        .iter()
        .map(|kind| (kind.as_str().to_string(), stats.errors(*kind)))
        .filter(|(_, count)| *count > 0)
        .collect();

    let secs = elapsed.as_secs_f64();
    let throughput_eps = if secs > 0.0 { stats.attempted() as f64 / secs } else { 0.0 };
    let success_rate = if stats.attempted() > 0 {
        stats.succeeded() as f64 / stats.attempted() as f64
    } else {
        0.0
    };

    let latency = match (stats.latency_mean(), stats.latency_max()) {
        (Some(mean), Some(max)) => Some(LatencySummary {
            mean,
            p50: stats.latency_quantile(0.5).unwrap_or_default(),
            p90: stats.latency_quantile(0.9).unwrap_or_default(),
            p99: stats.latency_quantile(0.99).unwrap_or_default(),
            max,
        }),
        _ => None,
    };

    RunSummary {
        attempted: stats.attempted(),
        succeeded: stats.succeeded(),
        failed: stats.failed(),
        errors,
        bytes_sent: stats.bytes_sent(),
        elapsed,
        throughput_eps,
        success_rate,
        latency,
    }
}
