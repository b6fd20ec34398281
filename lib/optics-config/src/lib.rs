//! Primitives for loading and querying configuration data.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, path::Path, sync::Arc};

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

mod provider;
use self::provider::FileProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing how to set the missing field.
        ///
        /// Includes the environment variable to set when environment variables were loaded.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field did not have the expected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Name of the invalid field.
        ///
        /// This is a period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to load configuration: {}", source))]
    Generic {
        /// Error source.
        source: figment::Error,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        from_figment_error(&HashSet::new(), e)
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct EnvironmentPrefix(String);

impl EnvironmentPrefix {
    fn transform_key(&self, key: &str) -> String {
        // The prefix is already uppercased, with a trailing underscore.
        format!("{}{}", self.0, key.replace('.', "_").to_uppercase())
    }
}

struct BoxedProvider(Box<dyn Provider + Send + Sync>);

impl Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that can pull from various sources.
///
/// Sources have an implicit priority based on the order in which they are added: sources added later take precedence
/// over sources added before them. Once every source is added, the loader is turned into a [`GenericConfiguration`]
/// through [`into_generic`][Self::into_generic].
///
/// # Supported sources
///
/// - YAML file
/// - JSON file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
/// - serializable values (see [`add_values`][Self::add_values])
#[derive(Default)]
pub struct ConfigurationLoader {
    environment_prefixes: HashSet<EnvironmentPrefix>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let provider = FileProvider::from_yaml(&path).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(provider)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    ///
    /// Errors include the file not existing, not being readable, and not being valid YAML.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match FileProvider::from_yaml(&path) {
            Ok(provider) => self.providers.push(BoxedProvider(Box::new(provider))),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().display(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or if the file is not valid JSON, an error will be returned.
    pub fn from_json<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let provider = FileProvider::from_json(&path).context(Generic)?;
        self.providers.push(BoxedProvider(Box::new(provider)));
        Ok(self)
    }

    /// Attempts to load the given JSON configuration file, ignoring any errors.
    ///
    /// Errors include the file not existing, not being readable, and not being valid JSON.
    pub fn try_from_json<P>(mut self, path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match FileProvider::from_json(&path) {
            Ok(provider) => self.providers.push(BoxedProvider(Box::new(provider))),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().display(), "Unable to read JSON configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given will have an underscore appended to it if it does not already end with one. For example, with a
    /// prefix of `app`, any environment variable starting with `APP_` would be matched, and `APP_API_TOKEN` would set
    /// the `api_token` field.
    ///
    /// The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, or the environment variables could not be read, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` is not `Send + Sync`, so the variables are captured now.
        let values = Env::prefixed(&prefix).data()?;
        if let Some(default_dict) = values.get(&Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
            self.environment_prefixes.insert(EnvironmentPrefix(prefix));
        }
        Ok(self)
    }

    /// Adds the given values as a configuration source.
    ///
    /// `values` must serialize to a map.
    pub fn add_values<T>(mut self, values: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.providers.push(BoxedProvider(Box::new(Serialized::defaults(values))));
        self
    }

    /// Consumes the configuration loader and wraps it in a generic wrapper.
    ///
    /// # Errors
    ///
    /// If the configuration sources could not be merged, an error will be returned.
    pub fn into_generic(self) -> Result<GenericConfiguration, ConfigurationError> {
        let figment = self
            .providers
            .into_iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        // Surface malformed sources here rather than on first query.
        figment.extract::<figment::value::Value>()?;

        Ok(GenericConfiguration {
            inner: Arc::new(Inner {
                figment,
                environment_prefixes: self.environment_prefixes,
            }),
        })
    }
}

#[derive(Debug)]
struct Inner {
    figment: Figment,
    environment_prefixes: HashSet<EnvironmentPrefix>,
}

/// A generic configuration object.
///
/// This represents the merged configuration derived from [`ConfigurationLoader`] in its raw form. Values can be queried
/// by key, or the configuration as a whole can be extracted as a typed value.
///
/// Keys must be in the form of `a.b.c`, where periods (`.`) are used to indicate a nested value.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.inner.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) if matches!(e.kind, Kind::MissingField(_)) => {
                // Environment variables can't express nesting, so `foo.bar` may only be present as `foo_bar`.
                let fallback_key = key.replace('.', "_");
                self.inner
                    .figment
                    .extract_inner(&fallback_key)
                    .map_err(|fallback_e| from_figment_error(&self.inner.environment_prefixes, fallback_e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gets a configuration value by key.
    ///
    /// ## Errors
    ///
    /// If the key does not exist in the configuration, or if the value could not be deserialized into `T`, an error
    /// variant will be returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// If the key exists in the configuration, and can be deserialized, `Ok(Some(value))` is returned. If the key does
    /// not exist, `Ok(None)` is returned.
    ///
    /// ## Errors
    ///
    /// If the value could not be deserialized into `T`, an error will be returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to deserialize the entire configuration as `T`.
    ///
    /// ## Errors
    ///
    /// If the value could not be deserialized into `T`, an error will be returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.environment_prefixes, e))
    }
}

fn from_figment_error(environment_prefixes: &HashSet<EnvironmentPrefix>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = environment_prefixes
                .iter()
                .map(|prefix| prefix.transform_key(&field))
                .collect::<Vec<_>>();
            valid_keys.insert(0, field.to_string());

            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Settings {
        name: String,
        #[serde(default)]
        retries: u32,
    }

    fn temp_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_file() {
        let file = temp_file(".yaml", "name: from-yaml\nretries: 3\nnested:\n  key: value\n");

        let config = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .into_generic()
            .unwrap();

        let settings: Settings = config.as_typed().unwrap();
        assert_eq!(
            settings,
            Settings {
                name: "from-yaml".to_string(),
                retries: 3
            }
        );
        assert_eq!(config.get_typed::<String>("nested.key").unwrap(), "value");
    }

    #[test]
    fn json_file() {
        let file = temp_file(".json", r#"{ "name": "from-json" }"#);

        let config = ConfigurationLoader::default()
            .from_json(file.path())
            .unwrap()
            .into_generic()
            .unwrap();

        let settings: Settings = config.as_typed().unwrap();
        assert_eq!(settings.name, "from-json");
        assert_eq!(settings.retries, 0);
    }

    #[test]
    fn missing_files() {
        assert!(ConfigurationLoader::default().from_yaml("/nonexistent/optics.yaml").is_err());

        let config = ConfigurationLoader::default()
            .try_from_yaml("/nonexistent/optics.yaml")
            .try_from_json("/nonexistent/optics.json")
            .into_generic()
            .unwrap();
        assert_eq!(config.try_get_typed::<String>("name").unwrap(), None);
    }

    #[test]
    fn later_sources_take_precedence() {
        let file = temp_file(".yaml", "name: from-yaml\nretries: 3\n");

        let config = ConfigurationLoader::default()
            .from_yaml(file.path())
            .unwrap()
            .add_values(json!({ "name": "override" }))
            .into_generic()
            .unwrap();

        let settings: Settings = config.as_typed().unwrap();
        assert_eq!(settings.name, "override");
        assert_eq!(settings.retries, 3);
    }

    #[test]
    fn environment() {
        std::env::set_var("OPTICS_CONFIG_TEST_NAME", "from-env");
        std::env::set_var("OPTICS_CONFIG_TEST_RETRIES", "5");

        let config = ConfigurationLoader::default()
            .add_values(json!({ "name": "default", "retries": 1 }))
            .from_environment("optics_config_test")
            .unwrap()
            .into_generic()
            .unwrap();

        let settings: Settings = config.as_typed().unwrap();
        assert_eq!(settings.name, "from-env");
        assert_eq!(settings.retries, 5);

        assert!(matches!(
            ConfigurationLoader::default().from_environment(""),
            Err(ConfigurationError::EmptyPrefix)
        ));
    }

    #[test]
    fn missing_field_help_mentions_environment() {
        std::env::set_var("OPTICS_HELP_TEST_UNRELATED", "1");

        let config = ConfigurationLoader::default()
            .from_environment("OPTICS_HELP_TEST_")
            .unwrap()
            .into_generic()
            .unwrap();

        match config.get_typed::<String>("api_token") {
            Err(ConfigurationError::MissingField { help_text, field }) => {
                assert_eq!(field, "api_token");
                assert_eq!(help_text, "Try setting `api_token` or `OPTICS_HELP_TEST_API_TOKEN`.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn invalid_field_type() {
        let config = ConfigurationLoader::default()
            .add_values(json!({ "name": "x", "retries": "many" }))
            .into_generic()
            .unwrap();

        assert!(matches!(
            config.as_typed::<Settings>(),
            Err(ConfigurationError::InvalidFieldType { .. })
        ));
        assert!(matches!(
            config.try_get_typed::<u32>("retries"),
            Err(ConfigurationError::InvalidFieldType { .. })
        ));
        assert_eq!(config.try_get_typed::<u32>("missing").unwrap(), None);
    }
}
