//! Reporter configuration.

use std::time::Duration;

use optics_config::{ConfigurationError, GenericConfiguration};
use serde::Deserialize;
use snafu::Snafu;

use crate::{payload::DisplayUnit, tags::Tags};

/// Default endpoint that measurements are uploaded to.
pub const DEFAULT_MEASUREMENTS_ENDPOINT: &str = "https://api.appoptics.com/v1/measurements";

const fn default_interval_secs() -> u64 {
    60
}

const fn default_request_timeout_secs() -> u64 {
    20
}

fn default_percentiles() -> Vec<f64> {
    vec![0.5, 0.95, 0.99]
}

/// A reporter configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ReporterConfigError {
    /// The API token was empty.
    #[snafu(display("API token must not be empty."))]
    EmptyApiToken,

    /// The reporting interval was zero.
    #[snafu(display("Reporting interval must be at least one second."))]
    ZeroInterval,

    /// A percentile was outside of `[0, 1]`.
    #[snafu(display("Percentile {} is invalid: percentiles must be between 0 and 1.", percentile))]
    InvalidPercentile {
        /// The offending percentile.
        percentile: f64,
    },
}

/// Reporter configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ReporterConfiguration {
    /// API token used to authenticate uploads.
    pub api_token: String,

    /// How often measurements are uploaded, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Tags added to every measurement.
    ///
    /// Tags on an individual metric take precedence over these.
    ///
    /// Defaults to no tags.
    #[serde(default)]
    pub tags: Tags,

    /// Percentiles reported for histograms and timers, as fractions between 0 and 1.
    ///
    /// Defaults to `[0.5, 0.95, 0.99]`.
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,

    /// Unit in which timer durations are displayed.
    ///
    /// Defaults to milliseconds.
    #[serde(default)]
    pub timer_display_unit: DisplayUnit,

    /// Prefix added to every metric name, such as `myservice.`.
    ///
    /// Defaults to no prefix.
    #[serde(default)]
    pub metric_prefix: String,

    /// Names of the `runtime.*` metrics to upload.
    ///
    /// When unset, all runtime metrics are uploaded. When set to an empty list, none are. Entries may be given with or
    /// without the `runtime.` prefix.
    ///
    /// Defaults to unset.
    #[serde(default)]
    pub runtime_metrics_allowlist: Option<Vec<String>>,

    /// Endpoint that measurements are uploaded to.
    ///
    /// Defaults to [`DEFAULT_MEASUREMENTS_ENDPOINT`].
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Timeout for each upload request, in seconds.
    ///
    /// Defaults to 20 seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Whether to record `runtime.*` metrics about the process before each report.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub capture_runtime_metrics: bool,
}

impl ReporterConfiguration {
    /// Creates a new `ReporterConfiguration` with the given API token and default settings.
    pub fn new<S>(api_token: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            api_token: api_token.into(),
            interval_secs: default_interval_secs(),
            tags: Tags::new(),
            percentiles: default_percentiles(),
            timer_display_unit: DisplayUnit::default(),
            metric_prefix: String::new(),
            runtime_metrics_allowlist: None,
            endpoint: None,
            request_timeout_secs: default_request_timeout_secs(),
            capture_runtime_metrics: false,
        }
    }

    /// Creates a new `ReporterConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If the API token is empty, the interval is zero, or a percentile is outside of `[0, 1]`, an error is returned.
    pub fn validate(&self) -> Result<(), ReporterConfigError> {
        if self.api_token.is_empty() {
            return Err(ReporterConfigError::EmptyApiToken);
        }

        if self.interval_secs == 0 {
            return Err(ReporterConfigError::ZeroInterval);
        }

        if let Some(percentile) = self.percentiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(ReporterConfigError::InvalidPercentile {
                percentile: *percentile,
            });
        }

        Ok(())
    }

    /// Returns the reporting interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the upload request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the endpoint that measurements are uploaded to.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_MEASUREMENTS_ENDPOINT)
    }
}

#[cfg(test)]
mod tests {
    use optics_config::ConfigurationLoader;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_from_minimal_config() {
        let config = ConfigurationLoader::default()
            .add_values(json!({ "api_token": "secret" }))
            .into_generic()
            .unwrap();

        let config = ReporterConfiguration::from_configuration(&config).unwrap();
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(20));
        assert_eq!(config.percentiles, vec![0.5, 0.95, 0.99]);
        assert_eq!(config.timer_display_unit, DisplayUnit::Milliseconds);
        assert_eq!(config.endpoint(), DEFAULT_MEASUREMENTS_ENDPOINT);
        assert!(config.runtime_metrics_allowlist.is_none());
        assert!(!config.capture_runtime_metrics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config() {
        let config = ConfigurationLoader::default()
            .add_values(json!({
                "api_token": "secret",
                "interval_secs": 10,
                "tags": { "env": "prod" },
                "percentiles": [0.5, 0.999],
                "timer_display_unit": "us",
                "metric_prefix": "svc.",
                "runtime_metrics_allowlist": [],
                "endpoint": "http://localhost:8080/v1/measurements",
            }))
            .into_generic()
            .unwrap();

        let config = ReporterConfiguration::from_configuration(&config).unwrap();
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(config.timer_display_unit, DisplayUnit::Microseconds);
        assert_eq!(config.runtime_metrics_allowlist, Some(vec![]));
        assert_eq!(config.endpoint(), "http://localhost:8080/v1/measurements");
    }

    #[test]
    fn validation() {
        let mut config = ReporterConfiguration::new("secret");
        assert!(config.validate().is_ok());

        config.interval_secs = 0;
        assert!(matches!(config.validate(), Err(ReporterConfigError::ZeroInterval)));

        config.interval_secs = 60;
        config.percentiles = vec![0.5, 99.0];
        assert!(matches!(
            config.validate(),
            Err(ReporterConfigError::InvalidPercentile { percentile }) if percentile == 99.0
        ));

        let config = ReporterConfiguration::new("");
        assert!(matches!(config.validate(), Err(ReporterConfigError::EmptyApiToken)));
    }
}
