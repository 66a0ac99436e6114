//! Connector configuration types
//!
//! A resource stores its connector configuration as a generic
//! [`ConnectorConfiguration`]; each connector parses the free-form
//! `properties` into its own typed [`ConnectorConfig`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::{ConnectorError, ConnectorResult};
use crate::resilience::RetryConfig;
use crate::types::ConnectorType;

/// Trait for connector-specific configuration.
pub trait ConnectorConfig: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Get the connector type this configuration is for.
    fn connector_type() -> ConnectorType;

    /// Validate the configuration.
    fn validate(&self) -> ConnectorResult<()>;

    /// Parse and validate from a generic configuration.
    fn from_configuration(configuration: &ConnectorConfiguration) -> ConnectorResult<Self> {
        if configuration.connector_type != Self::connector_type() {
            return Err(ConnectorError::configuration(format!(
                "configuration is for connector '{}', expected '{}'",
                configuration.connector_type,
                Self::connector_type()
            )));
        }
        let parsed: Self =
            serde_json::from_value(serde_json::Value::Object(configuration.properties.clone()))
                .map_err(|e| ConnectorError::configuration(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Common connection settings shared across connector types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Upper bound on a single connector call, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Maximum retry attempts for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ConnectionSettings {
    /// Set the operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Get the operation timeout as Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Retry policy derived from these settings.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_delay_ms),
            ..RetryConfig::default()
        }
    }
}

/// Connector configuration as stored on a resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfiguration {
    pub connector_type: ConnectorType,

    /// Connector-specific connection parameters.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub settings: ConnectionSettings,
}

impl ConnectorConfiguration {
    /// Create a configuration with no properties.
    pub fn new(connector_type: impl Into<ConnectorType>) -> Self {
        Self {
            connector_type: connector_type.into(),
            properties: serde_json::Map::new(),
            settings: ConnectionSettings::default(),
        }
    }

    /// Set a connector property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the connection settings.
    #[must_use]
    pub fn with_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stable digest of the configuration, used to detect changes.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.connector_type.hash(&mut hasher);
        // serde_json::Map keeps keys sorted, so rendering is deterministic.
        serde_json::Value::Object(self.properties.clone())
            .to_string()
            .hash(&mut hasher);
        self.settings.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct TestConfig {
        host: String,
    }

    impl ConnectorConfig for TestConfig {
        fn connector_type() -> ConnectorType {
            ConnectorType::new("test")
        }

        fn validate(&self) -> ConnectorResult<()> {
            if self.host.is_empty() {
                return Err(ConnectorError::configuration("host must not be empty"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: ConnectionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert_eq!(settings.operation_timeout(), Duration::from_secs(30));
        assert_eq!(settings.retry_config().max_retries, 3);
    }

    #[test]
    fn test_typed_config_parsing() {
        let configuration = ConnectorConfiguration::new("test").with_property("host", "ldap.example.com");
        let parsed = TestConfig::from_configuration(&configuration).unwrap();
        assert_eq!(parsed.host, "ldap.example.com");
    }

    #[test]
    fn test_typed_config_errors() {
        let wrong_type = ConnectorConfiguration::new("other").with_property("host", "x");
        assert!(matches!(
            TestConfig::from_configuration(&wrong_type),
            Err(ConnectorError::Configuration { .. })
        ));

        let missing = ConnectorConfiguration::new("test");
        assert!(TestConfig::from_configuration(&missing).is_err());

        let invalid = ConnectorConfiguration::new("test").with_property("host", "");
        assert!(TestConfig::from_configuration(&invalid).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = ConnectorConfiguration::new("test").with_property("host", "a");
        let b = ConnectorConfiguration::new("test").with_property("host", "b");
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
