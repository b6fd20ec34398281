//! Logging.

use anyhow::{anyhow, Context as _};
use optics_config::GenericConfiguration;
use serde::Deserialize;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

/// Logging configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Log level filtering directives.
    ///
    /// Follows the [`EnvFilter`] directive syntax, so either a bare level (`debug`) or per-target levels
    /// (`info,optics_metrics=debug`) can be given.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to emit logs as JSON, one object per line.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub log_format_json: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, anyhow::Error> {
        config
            .as_typed()
            .context("Failed to load logging configuration.")
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
        }
    }
}

/// Validated log level filtering directives.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel {
    directives: String,
}

impl LogLevel {
    /// Returns the raw filtering directives.
    pub fn directives(&self) -> &str {
        &self.directives
    }

    /// Builds an [`EnvFilter`] from these directives.
    pub fn as_env_filter(&self) -> EnvFilter {
        EnvFilter::builder().parse_lossy(&self.directives)
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self {
            directives: level.to_string().to_lowercase(),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let directives = value.trim();
        if directives.is_empty() {
            return Err(anyhow!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(directives)
            .context("Failed to parse valid log level.")?;

        Ok(Self {
            directives: directives.to_string(),
        })
    }
}

/// Initializes the logging subsystem for `tracing`.
///
/// Logs are written to standard output, either in a compact human-readable format or, when `log_format_json` is set,
/// as flattened JSON objects.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), anyhow::Error> {
    let filter = config.log_level.as_env_filter();

    let result = if config.log_format_json {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().compact().with_env_filter(filter).try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
