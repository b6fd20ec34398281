use std::time::{Duration, SystemTime};

use snafu::{ResultExt as _, Snafu};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{
    client::{ClientError, Transport},
    config::{ReporterConfigError, ReporterConfiguration},
    registry::{Registry, RegistryError},
    runtime::RuntimeMetrics,
    translate::{TranslateError, Translator},
};

/// A reporter error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ReportError {
    /// The reporter configuration was invalid.
    #[snafu(display("Invalid reporter configuration: {}", source))]
    InvalidConfiguration {
        /// Error source.
        source: ReporterConfigError,
    },

    /// Runtime metrics could not be registered.
    #[snafu(display("Failed to register runtime metrics: {}", source))]
    RegisterRuntimeMetrics {
        /// Error source.
        source: RegistryError,
    },

    /// The registry could not be translated into a batch.
    #[snafu(display("Failed to translate metrics: {}", source))]
    Translate {
        /// Error source.
        source: TranslateError,
    },

    /// The batch could not be uploaded.
    #[snafu(display("Failed to upload metrics: {}", source))]
    Upload {
        /// Error source.
        source: ClientError,
    },
}

/// Periodically uploads every instrument in a registry.
///
/// Each cycle snapshots the registry, translates it into a batch, and hands the batch to the transport. A failed cycle
/// is logged and otherwise ignored: the next cycle runs as scheduled.
///
/// Only one upload is ever in flight. If an upload takes longer than the reporting interval, the ticks missed in the
/// meantime are skipped rather than replayed.
pub struct Reporter<T> {
    registry: Registry,
    translator: Translator,
    transport: T,
    interval: Duration,
    runtime_metrics: Option<RuntimeMetrics>,
}

impl<T> Reporter<T>
where
    T: Transport,
{
    /// Creates a new `Reporter`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or runtime metrics are enabled and cannot be registered, an error is returned.
    pub fn new(config: &ReporterConfiguration, registry: Registry, transport: T) -> Result<Self, ReportError> {
        config.validate().context(InvalidConfiguration)?;

        let runtime_metrics = if config.capture_runtime_metrics {
            Some(RuntimeMetrics::new(&registry).context(RegisterRuntimeMetrics)?)
        } else {
            None
        };

        Ok(Self {
            registry,
            translator: Translator::new(config),
            transport,
            interval: config.interval(),
            runtime_metrics,
        })
    }

    /// Returns the registry being reported.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs a single reporting cycle for the tick at `now`.
    ///
    /// Returns the number of measurements uploaded.
    ///
    /// # Errors
    ///
    /// If the registry cannot be translated, or the batch cannot be uploaded, an error is returned.
    pub async fn report(&self, now: SystemTime) -> Result<usize, ReportError> {
        if let Some(runtime_metrics) = &self.runtime_metrics {
            runtime_metrics.capture();
        }

        let batch = self
            .translator
            .translate_registry(now, &self.registry)
            .context(Translate)?;
        let measurements = batch.len();

        self.transport.post(&batch).await.context(Upload)?;

        Ok(measurements)
    }

    /// Runs the reporter until the task is dropped or aborted.
    ///
    /// The first cycle runs one interval after this is called.
    pub async fn run(self) {
        let mut tick_interval = interval(self.interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately.
        tick_interval.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Reporter started.");

        loop {
            tick_interval.tick().await;

            match self.report(SystemTime::now()).await {
                Ok(measurements) => debug!(measurements, "Completed reporting cycle."),
                Err(e) => error!(error = %e, "Failed to report metrics. Skipping cycle."),
            }
        }
    }
}

impl<T> Reporter<T>
where
    T: Transport + 'static,
{
    /// Runs the reporter on a new Tokio task.
    ///
    /// Aborting the returned handle stops the reporter.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
