//! Statistics collection and analysis

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod analysis;
pub mod collector;

// Re-export main types
pub use analysis::summarize;
pub use collector::DeliveryStats;

/// Latency percentiles of successful deliveries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    #[serde(with = "humantime_serde")]
    pub mean: Duration,
    #[serde(with = "humantime_serde")]
    pub p50: Duration,
    #[serde(with = "humantime_serde")]
    pub p90: Duration,
    #[serde(with = "humantime_serde")]
    pub p99: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

/// Aggregated run statistics, written to the results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failure count per error kind, kinds without failures omitted
    pub errors: BTreeMap<String, u64>,
    pub bytes_sent: u64,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub throughput_eps: f64,
    pub success_rate: f64,
    pub latency: Option<LatencySummary>,
}
