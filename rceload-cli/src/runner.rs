//! Experiment execution
//!
//! Turns a validated profile into dispatcher runs: tcp and udp clients are
//! spread over `clients.threads` pollers, http runs one blocking client per
//! thread. Every worker returns its own `DeliveryStats`, merged at the end.

use crate::config::{ProfileConfig, TransportKind};
use crate::output::ExperimentResults;
use anyhow::Result;
use rceload_core::dispatch::{HttpDispatcher, SocketDispatcher, UdpDispatcher};
use rceload_core::seed::{client_seed, components, derive_seed};
use rceload_core::stats::{summarize, DeliveryStats};
use rceload_core::threading::ThreadingRuntime;
use rceload_core::{CancellationToken, EventCount, EventGenerator, SyntheticDataset};
use std::time::Instant;
use tracing::info;

/// Client factory shared by all workers of a run
#[derive(Clone)]
struct ClientStreams {
    dataset: SyntheticDataset,
    count: EventCount,
    seed: Option<u64>,
}

impl ClientStreams {
    fn events(&self, client_id: usize) -> rceload_core::Result<EventGenerator> {
        self.dataset.events(self.count, self.seed.map(|s| client_seed(s, client_id)))
    }

    /// Clients owned by worker `thread_id` out of `threads`
    fn for_thread(
        &self,
        thread_id: usize,
        threads: usize,
        clients: usize,
    ) -> rceload_core::Result<Vec<(usize, EventGenerator)>> {
        (thread_id..clients)
            .step_by(threads)
            .map(|id| Ok((id, self.events(id)?)))
            .collect()
    }
}

/// Run the experiment described by `config` until every client is done,
/// the experiment duration elapses, or `cancel` fires
pub fn run(config: &ProfileConfig, cancel: &CancellationToken) -> Result<ExperimentResults> {
    config.validate()?;

    let spec = config.distribution_spec()?;
    let seed = config.experiment.seed;
    let clients = config.clients.count;

    let streams = ClientStreams {
        dataset: SyntheticDataset::new(spec, seed.map(|s| derive_seed(s, components::DATASET)))?,
        count: config.experiment.events_per_client.into(),
        seed,
    };

    info!(
        "Running '{}': {} clients -> {} {}",
        config.experiment.name,
        clients,
        config.target.transport.as_str(),
        config.target_display()
    );

    let start = Instant::now();
    let per_worker = match config.target.transport {
        TransportKind::Tcp => {
            let dispatcher_config = config.socket_config()?;
            let threads = config.clients.threads.min(clients);
            let cancel = cancel.clone();

            ThreadingRuntime::new(threads).run_workers(move |thread_id| {
                let mut stats = DeliveryStats::new()?;
                let owned = streams.for_thread(thread_id, threads, clients)?;
                SocketDispatcher::new(dispatcher_config.clone())
                    .with_cancellation(cancel.clone())
                    .run(owned, &mut stats)?;
                Ok(stats)
            })?
        }
        TransportKind::Udp => {
            let dispatcher_config = config.udp_config()?;
            let threads = config.clients.threads.min(clients);
            let cancel = cancel.clone();

            ThreadingRuntime::new(threads).run_workers(move |thread_id| {
                let mut stats = DeliveryStats::new()?;
                let owned = streams.for_thread(thread_id, threads, clients)?;
                UdpDispatcher::new(dispatcher_config.clone())
                    .with_cancellation(cancel.clone())
                    .run(owned, &mut stats)?;
                Ok(stats)
            })?
        }
        TransportKind::Http => {
            let dispatcher_config = config.http_config()?;
            let cancel = cancel.clone();

            ThreadingRuntime::new(clients).run_workers(move |client_id| {
                let mut stats = DeliveryStats::new()?;
                let events = streams.events(client_id)?;
                HttpDispatcher::new(dispatcher_config.clone())?
                    .with_cancellation(cancel.clone())
                    .run(client_id, events, &mut stats)?;
                Ok(stats)
            })?
        }
    };
    let elapsed = start.elapsed();

    let mut stats = DeliveryStats::new()?;
    for worker_stats in &per_worker {
        stats.merge(worker_stats);
    }
    let summary = summarize(&stats, elapsed);

    info!(
        "Run finished: {}/{} delivered in {:.2}s",
        summary.succeeded,
        summary.attempted,
        elapsed.as_secs_f64()
    );

    Ok(ExperimentResults {
        experiment: config.experiment.name.clone(),
        transport: config.target.transport.as_str().to_string(),
        target: config.target_display(),
        classes: spec.class_count(),
        features: spec.feature_count(),
        skew: spec.skew(),
        clients,
        seed,
        summary,
    })
}
