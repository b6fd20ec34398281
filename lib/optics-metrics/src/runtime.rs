use std::time::Instant;

use tokio::runtime::Handle;

use crate::{
    registry::{Gauge, Registry, RegistryError},
    translate::RUNTIME_NAMESPACE,
};

/// Process and Tokio runtime metrics, recorded as `runtime.*` gauges.
///
/// Gauges are registered once, when the collector is created, and updated on every call to [`capture`][Self::capture].
#[derive(Debug)]
pub struct RuntimeMetrics {
    started: Instant,
    uptime_secs: Gauge,
    workers: Gauge,
    alive_tasks: Gauge,
    global_queue_depth: Gauge,
}

impl RuntimeMetrics {
    /// Creates a new `RuntimeMetrics`, registering its gauges in `registry`.
    ///
    /// # Errors
    ///
    /// If an instrument other than a gauge is already registered under one of the runtime metric names, an error is
    /// returned.
    pub fn new(registry: &Registry) -> Result<Self, RegistryError> {
        let gauge = |name: &str| registry.get_or_register_gauge(&format!("{}{}", RUNTIME_NAMESPACE, name));

        Ok(Self {
            started: Instant::now(),
            uptime_secs: gauge("uptime_secs")?,
            workers: gauge("tokio.workers")?,
            alive_tasks: gauge("tokio.alive_tasks")?,
            global_queue_depth: gauge("tokio.global_queue_depth")?,
        })
    }

    /// Updates every runtime gauge.
    ///
    /// The Tokio gauges are only updated when called from within a Tokio runtime.
    pub fn capture(&self) {
        self.uptime_secs.update(saturating_i64(self.started.elapsed().as_secs()));

        if let Ok(handle) = Handle::try_current() {
            let metrics = handle.metrics();
            self.workers.update(saturating_i64(metrics.num_workers()));
            self.alive_tasks.update(saturating_i64(metrics.num_alive_tasks()));
            self.global_queue_depth.update(saturating_i64(metrics.global_queue_depth()));
        }
    }
}

fn saturating_i64<N>(value: N) -> i64
where
    N: TryInto<i64>,
{
    value.try_into().unwrap_or(i64::MAX)
}
