//! CLI entry point for plasma_daq.
//!
//! Runs a diagnostics session against the simulated probe bench, or validates a
//! configuration file.
//!
//! # Usage
//!
//! ```bash
//! plasma_daq run --config config/plasma_daq.toml --probe slp-1 --seconds 10
//! plasma_daq check --config config/plasma_daq.toml --print
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use plasma_daq::config::{ConfigStore, DaqConfig, RunConfig};
use plasma_daq::hardware::mock::{MockHardwareFactory, PlasmaModel};
use plasma_daq::lifecycle::Lifecycle;
use plasma_daq::operation::{RunOutcome, RunStatus};
use plasma_daq::report::Reporter;
use plasma_daq::{telemetry, DiagnosticsLayer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "plasma_daq")]
#[command(about = "Plasma probe diagnostics engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one diagnostics session on the simulated bench
    Run {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,

        /// Probe identifier from the configuration
        #[arg(long)]
        probe: String,

        /// Run duration in seconds
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Stop after this many samples
        #[arg(long)]
        samples: Option<u64>,

        /// Print the full run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,

        /// Print the effective configuration, environment overrides applied
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            probe,
            seconds,
            samples,
            json,
        } => run(config, probe, seconds, samples, json).await,
        Commands::Check { config, print } => check(config, print),
    }
}

fn load(path: &Path) -> Result<DaqConfig> {
    let config = DaqConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check(path: PathBuf, print: bool) -> Result<()> {
    let config = load(&path)?;
    if print {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    let store = ConfigStore::from_config(&config)?;
    for probe in config.enabled_probes() {
        plasma_daq::probe::settings::ProbeSettings::resolve(&store, &probe.id)
            .with_context(|| format!("probe '{}'", probe.id))?;
        println!("  {} ({}): ok", probe.id, probe.kind);
    }
    println!("{}: valid", path.display());
    Ok(())
}

async fn run(
    path: PathBuf,
    probe_id: String,
    seconds: f64,
    samples: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = load(&path)?;
    telemetry::init_from_config(&config)?;

    let definition = config
        .enabled_probes()
        .into_iter()
        .find(|p| p.id == probe_id)
        .ok_or_else(|| anyhow!("no enabled probe '{probe_id}' in {}", path.display()))?;
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| anyhow!("invalid duration {seconds}"))?;

    let factory = MockHardwareFactory::new(definition.kind, PlasmaModel::default());
    let store = ConfigStore::from_config(&config)?;
    let mut layer = DiagnosticsLayer::new(Arc::new(factory), Arc::new(store), Reporter::Tracing)?;

    let mut run = RunConfig::from_engine(&config.engine, &probe_id);
    run.max_samples = samples;

    let flags = layer.flags().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            flags.command.request_shutdown();
        }
    });

    info!(probe_id = %probe_id, kind = %definition.kind, ?duration, "Starting run");
    let (outcome, mut layer) = tokio::task::spawn_blocking(move || {
        let outcome = layer.run_for(&run, duration);
        (outcome, layer)
    })
    .await?;
    let outcome = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    layer.shutdown()?;

    match outcome.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed(reason) => Err(anyhow!("run failed: {reason}")),
    }
}

fn print_summary(outcome: &RunOutcome) {
    println!("Run {} on {}", outcome.run_id, outcome.probe_id);
    println!(
        "  {} records, {} samples dropped, {}",
        outcome.records.len(),
        outcome.samples_dropped,
        match &outcome.status {
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Failed(reason) => format!("failed: {reason}"),
        }
    );
    if let Some(last) = outcome.records.last() {
        for entry in &last.display.values {
            println!("  {:<40} {:>14.6e}", entry.name, entry.value);
        }
    }
}
