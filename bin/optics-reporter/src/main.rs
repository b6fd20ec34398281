//! A standalone process that periodically reports its own metrics to a measurements endpoint.
//!
//! Configuration is read from an optional YAML file, given as the only argument, and from environment variables
//! prefixed with `OPTICS_`, which take precedence over the file.

#![deny(warnings)]
#![deny(missing_docs)]

use std::time::{Duration, Instant};

use anyhow::Context as _;
use optics_app::prelude::*;
use optics_config::{ConfigurationLoader, GenericConfiguration};
use optics_metrics::{MeasurementsClient, MetricBuilder, Registry, Reporter, ReporterConfiguration};
use tokio::{select, time::interval};
use tracing::{error, info};

const ENVIRONMENT_PREFIX: &str = "OPTICS";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:?}", e);
            std::process::exit(1);
        }
    };

    let logging_config = match LoggingConfiguration::from_configuration(&config) {
        Ok(logging_config) => logging_config,
        Err(e) => {
            eprintln!("FATAL: {:?}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = initialize_logging(&logging_config) {
        eprintln!("FATAL: {:?}", e);
        std::process::exit(1);
    }

    match run(&config).await {
        Ok(()) => info!("optics-reporter stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn load_configuration() -> Result<GenericConfiguration, anyhow::Error> {
    // We only accept a single, optional, command line argument: the path to the configuration file.
    let mut loader = ConfigurationLoader::default();
    if let Some(config_path) = std::env::args().nth(1) {
        loader = loader
            .from_yaml(&config_path)
            .with_context(|| format!("Failed to load configuration file '{}'.", config_path))?;
    }

    loader
        .from_environment(ENVIRONMENT_PREFIX)?
        .into_generic()
        .context("Failed to load configuration.")
}

async fn run(config: &GenericConfiguration) -> Result<(), anyhow::Error> {
    info!("optics-reporter starting...");

    let reporter_config = ReporterConfiguration::from_configuration(config)?;
    let client = MeasurementsClient::from_configuration(&reporter_config)?;

    let registry = Registry::new();
    let reporter = Reporter::new(&reporter_config, registry.clone(), client)?;

    info!(
        endpoint = reporter_config.endpoint(),
        interval_secs = reporter_config.interval_secs,
        "optics-reporter started."
    );

    let reporter_handle = reporter.spawn();

    select! {
        result = emit_heartbeats(registry) => result?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal.")?;
            info!("Received shutdown signal.");
        }
    }

    reporter_handle.abort();
    Ok(())
}

/// Keeps a few instruments about this process up to date.
async fn emit_heartbeats(registry: Registry) -> Result<(), anyhow::Error> {
    let heartbeats = MetricBuilder::new(&registry, "optics.reporter.heartbeat").counter()?;
    let uptime = MetricBuilder::new(&registry, "optics.reporter.uptime_secs").gauge()?;
    let ticks = MetricBuilder::new(&registry, "optics.reporter.ticks").meter()?;

    let started = Instant::now();
    let mut tick_interval = interval(HEARTBEAT_INTERVAL);

    loop {
        tick_interval.tick().await;

        heartbeats.inc(1);
        uptime.update(i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX));
        ticks.mark(1);
    }
}
