//! Results output formatting

use anyhow::{Context, Result};
use rceload_core::stats::RunSummary;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Experiment results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment: String,
    pub transport: String,
    pub target: String,
    pub classes: u32,
    pub features: u32,
    pub skew: f64,
    pub clients: usize,
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub summary: RunSummary,
}

impl ExperimentResults {
    /// Print results to stdout in human-readable format
    pub fn print_human(&self) {
        let summary = &self.summary;

        println!("\n{}", "=".repeat(60));
        println!("rceload Delivery Results: {}", self.experiment);
        println!("{}", "=".repeat(60));
        println!();
        println!("Configuration:");
        println!("  Transport:       {}", self.transport);
        println!("  Target:          {}", self.target);
        println!(
            "  Distribution:    {} classes, {} features, skew {:.2}",
            self.classes, self.features, self.skew
        );
        println!("  Clients:         {}", self.clients);
        match self.seed {
            Some(seed) => println!("  Seed:            {seed}"),
            None => println!("  Seed:            (entropy)"),
        }
        println!("  Elapsed:         {:.2}s", summary.elapsed.as_secs_f64());
        println!();
        println!("Delivery:");
        println!("  Attempted:       {}", summary.attempted);
        println!(
            "  Succeeded:       {} ({:.2}%)",
            summary.succeeded,
            summary.success_rate * 100.0
        );
        println!("  Failed:          {}", summary.failed);
        for (kind, count) in &summary.errors {
            println!("    {:<15} {}", format!("{kind}:"), count);
        }
        println!("  Rate:            {:.2} events/s", summary.throughput_eps);
        println!("  Bytes sent:      {}", summary.bytes_sent);
        println!();
        match &summary.latency {
            Some(latency) => {
                println!("Latency (microseconds):");
                println!("  Mean:            {:.2} μs", micros(latency.mean));
                println!("  p50:             {:.2} μs", micros(latency.p50));
                println!("  p90:             {:.2} μs", micros(latency.p90));
                println!("  p99:             {:.2} μs", micros(latency.p99));
                println!("  Max:             {:.2} μs", micros(latency.max));
            }
            None => println!("Latency:           no successful deliveries"),
        }
        println!();
        println!("{}", "=".repeat(60));
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write results to JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)
            .with_context(|| format!("Failed to create results file: {}", path.display()))?;
        file.write_all(json.as_bytes())?;
        tracing::info!("Results written to: {}", path.display());
        Ok(())
    }
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rceload_core::stats::LatencySummary;
    use std::collections::BTreeMap;

    fn results() -> ExperimentResults {
        let mut errors = BTreeMap::new();
        errors.insert("connection_failure".to_string(), 2);

        ExperimentResults {
            experiment: "unit".to_string(),
            transport: "tcp".to_string(),
            target: "127.0.0.1:9000".to_string(),
            classes: 3,
            features: 10,
            skew: 0.6,
            clients: 2,
            seed: Some(7),
            summary: RunSummary {
                attempted: 100,
                succeeded: 98,
                failed: 2,
                errors,
                bytes_sent: 8_624,
                elapsed: Duration::from_secs(2),
                throughput_eps: 50.0,
                success_rate: 0.98,
                latency: Some(LatencySummary {
                    mean: Duration::from_micros(120),
                    p50: Duration::from_micros(100),
                    p90: Duration::from_micros(200),
                    p99: Duration::from_micros(400),
                    max: Duration::from_micros(900),
                }),
            },
        }
    }

    #[test]
    fn test_json_layout() {
        let json: serde_json::Value = serde_json::from_str(&results().to_json().unwrap()).unwrap();

        assert_eq!(json["experiment"], "unit");
        // Summary fields sit at the top level
        assert_eq!(json["attempted"], 100);
        assert_eq!(json["errors"]["connection_failure"], 2);
        assert_eq!(json["elapsed"], "2s");
        assert_eq!(json["latency"]["p99"], "400us");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");

        results().write_json(&path).unwrap();

        let parsed: ExperimentResults =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.summary, results().summary);
        assert_eq!(parsed.seed, Some(7));
    }
}
