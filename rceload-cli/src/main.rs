use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rceload_cli::config::{OutputFormat, ProfileConfig};
use rceload_cli::runner;
use rceload_core::{generate, CancellationToken, DistributionSpec, EventCount};
use schemars::schema_for;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rceload: synthetic event load driver for classification services
///
/// Runs are described by TOML profiles (see profiles/) so a load test can be
/// repeated exactly.
///
/// Example usage:
///   rceload run -P profiles/tcp-socket.toml
///   rceload run -P profiles/http-servlet.toml --set clients.count=16
///   rceload run -P profiles/tcp-ack.toml --set experiment.seed=12345 --set distribution.skew=0.9
///   rceload generate --classes 3 --features 10 --skew 0.6 --count 1000 --seed 1
#[derive(Parser)]
#[command(name = "rceload")]
#[command(version, about = "Synthetic event load driver with config-first design", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test described by a profile
    Run {
        /// Path to TOML profile configuration file (REQUIRED)
        #[arg(short = 'P', long, required = true)]
        profile: PathBuf,

        /// Override any configuration value using dot notation (can be specified multiple times)
        ///
        /// Examples:
        ///   --set target.address=127.0.0.1:9000
        ///   --set experiment.duration=60s
        ///   --set experiment.seed=999
        ///   --set distribution.skew=0.8
        ///   --set output.file=/tmp/results.json
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Write generated events to stdout or a file without dispatching them
    Generate {
        #[arg(long)]
        classes: u32,

        #[arg(long)]
        features: u32,

        /// Class skew in [0, 1]
        #[arg(long, default_value_t = 0.0)]
        skew: f64,

        /// Number of events
        #[arg(short = 'n', long)]
        count: u64,

        #[arg(long)]
        seed: Option<u64>,

        /// Round feature readings to integers
        #[arg(long)]
        discrete: bool,

        #[arg(long, value_enum, default_value_t = GenerateFormat::Jsonl)]
        format: GenerateFormat,

        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Generate JSON Schema for configuration files
    Schema,
}

#[derive(Clone, Copy, ValueEnum)]
enum GenerateFormat {
    /// One JSON object per line
    Jsonl,
    /// Concatenated wire messages
    Wire,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Commands::Schema => {
            let schema = schema_for!(ProfileConfig);
            let schema_json = serde_json::to_string_pretty(&schema)?;
            println!("{}", schema_json);
            Ok(())
        }
        Commands::Generate { classes, features, skew, count, seed, discrete, format, output } => {
            let spec = DistributionSpec::new(classes, features, skew)?.with_discrete(discrete);
            let events = generate(spec, EventCount::Finite(count), seed)?;

            let sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            let mut sink = BufWriter::new(sink);
            let mut buf = Vec::new();

            for event in events {
                match format {
                    GenerateFormat::Jsonl => {
                        serde_json::to_writer(&mut sink, &event)?;
                        sink.write_all(b"\n")?;
                    }
                    GenerateFormat::Wire => {
                        buf.clear();
                        rceload_protocols::encode_into(&event, &mut buf);
                        sink.write_all(&buf)?;
                    }
                }
            }
            sink.flush()?;
            Ok(())
        }
        Commands::Run { profile, set } => run_experiment(profile, set),
    }
}

fn run_experiment(profile: PathBuf, set: Vec<String>) -> anyhow::Result<()> {
    tracing::info!("Loading profile: {}", profile.display());

    let config = ProfileConfig::from_file_with_overrides(&profile, &set)?;
    config.validate()?;

    tracing::info!("=== Experiment Configuration ===");
    tracing::info!("Name: {}", config.experiment.name);
    if let Some(desc) = &config.experiment.description {
        tracing::info!("Description: {}", desc);
    }
    if let Some(seed) = config.experiment.seed {
        tracing::info!("Seed: {} (reproducible mode)", seed);
    }
    tracing::info!("Duration: {:?}", config.experiment.duration);
    match config.experiment.events_per_client {
        Some(n) => tracing::info!("Events per client: {}", n),
        None => tracing::info!("Events per client: unbounded"),
    }
    tracing::info!(
        "Target: {} ({})",
        config.target_display(),
        config.target.transport.as_str()
    );
    tracing::info!(
        "Distribution: {} classes, {} features, skew {}{}",
        config.distribution.classes,
        config.distribution.features,
        config.distribution.skew,
        if config.distribution.discrete { ", discrete" } else { "" }
    );
    tracing::info!(
        "Clients: {} on {} threads, pacing {:?}",
        config.clients.count,
        config.clients.threads,
        config.clients.pacing
    );
    tracing::info!("================================");

    let results = runner::run(&config, &CancellationToken::new())?;

    match config.output.format {
        OutputFormat::Human => results.print_human(),
        OutputFormat::Json => println!("{}", results.to_json()?),
    }
    if let Some(path) = &config.output.file {
        results.write_json(path)?;
    }

    Ok(())
}
