use std::fmt;

use tracing::warn;

use crate::{
    registry::{Counter, Gauge, GaugeFloat, Histogram, Meter, Registry, RegistryError, SamplingStrategy, Timer},
    tags::{encode, sanitize_metric_name, sanitize_tag_name, sanitize_tag_value, MetricIdentity, Tags},
};

/// Builder for tagged metrics.
///
/// The metric name and every tag are sanitized as they are added, and the resulting identity is encoded into the key
/// used to look up (or register) the instrument in the registry:
///
/// ```
/// # use optics_metrics::{MetricBuilder, Registry};
/// let registry = Registry::new();
/// let counter = MetricBuilder::new(&registry, "http.requests")
///     .tag("method", "GET")
///     .tag("status", 200)
///     .counter()
///     .unwrap();
/// counter.inc(1);
///
/// assert!(registry.get("http.requests#method=get,status=200").is_some());
/// ```
#[derive(Clone, Debug)]
pub struct MetricBuilder {
    registry: Registry,
    name: String,
    tags: Tags,
}

impl MetricBuilder {
    /// Creates a new `MetricBuilder` for the given metric name, bound to `registry`.
    pub fn new(registry: &Registry, name: &str) -> Self {
        Self {
            registry: registry.clone(),
            name: sanitize_metric_name(name),
            tags: Tags::new(),
        }
    }

    /// Adds a tag.
    ///
    /// Setting the same tag name more than once keeps the last value. Tags whose name or value is empty after
    /// sanitization are dropped.
    pub fn tag<V>(mut self, name: &str, value: V) -> Self
    where
        V: fmt::Display,
    {
        let tag_name = sanitize_tag_name(name);
        let tag_value = sanitize_tag_value(&value.to_string());

        if tag_name.is_empty() || tag_value.is_empty() {
            warn!(metric_name = %self.name, %tag_name, %tag_value, "Empty tag name or value. Ignoring tag.");
            return self;
        }

        self.tags.insert(tag_name, tag_value);
        self
    }

    /// Returns the sanitized metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sanitized tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns the identity this builder describes.
    pub fn identity(&self) -> MetricIdentity {
        MetricIdentity::new(self.name.clone(), self.tags.clone())
    }

    /// Returns the registry key this builder resolves to.
    pub fn key(&self) -> String {
        encode(&self.name, &self.tags)
    }

    /// Gets or registers a counter.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn counter(&self) -> Result<Counter, RegistryError> {
        self.registry.get_or_register_counter(&self.key())
    }

    /// Gets or registers an integer gauge.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn gauge(&self) -> Result<Gauge, RegistryError> {
        self.registry.get_or_register_gauge(&self.key())
    }

    /// Gets or registers a floating-point gauge.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn gauge_float(&self) -> Result<GaugeFloat, RegistryError> {
        self.registry.get_or_register_gauge_float(&self.key())
    }

    /// Gets or registers a meter.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn meter(&self) -> Result<Meter, RegistryError> {
        self.registry.get_or_register_meter(&self.key())
    }

    /// Gets or registers a timer.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn timer(&self) -> Result<Timer, RegistryError> {
        self.registry.get_or_register_timer(&self.key())
    }

    /// Gets or registers a histogram.
    ///
    /// `strategy` only applies when the histogram does not exist yet.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under the same key, an error is returned.
    pub fn histogram(&self, strategy: SamplingStrategy) -> Result<Histogram, RegistryError> {
        self.registry.get_or_register_histogram(&self.key(), strategy)
    }
}

impl fmt::Display for MetricBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
