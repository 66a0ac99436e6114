//! Dummy connector configuration.

use serde::{Deserialize, Serialize};

use midpoint_ucf::config::ConnectorConfig;
use midpoint_ucf::error::{ConnectorError, ConnectorResult};
use midpoint_ucf::types::ConnectorType;

/// Connector type identifier.
pub const DUMMY_CONNECTOR_TYPE: &str = "dummy";

/// Default namespace of dummy resource attributes.
pub const DUMMY_NAMESPACE: &str = "http://midpoint.evolveum.com/xml/ns/public/resource/instance/dummy";

fn default_namespace() -> String {
    DUMMY_NAMESPACE.to_string()
}

/// Configuration of one dummy resource connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyConfig {
    /// Name of the in-memory resource instance to bind to.
    pub instance: String,

    /// Namespace used for resource attribute names.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl DummyConfig {
    /// Create a configuration bound to the named instance.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            namespace: default_namespace(),
        }
    }

    /// Use a different attribute namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

impl ConnectorConfig for DummyConfig {
    fn connector_type() -> ConnectorType {
        ConnectorType::new(DUMMY_CONNECTOR_TYPE)
    }

    fn validate(&self) -> ConnectorResult<()> {
        if self.instance.trim().is_empty() {
            return Err(ConnectorError::configuration("instance must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConnectorError::configuration("namespace must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midpoint_ucf::config::ConnectorConfiguration;

    #[test]
    fn test_defaults_applied() {
        let configuration =
            ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", "opendj");
        let config = DummyConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config, DummyConfig::new("opendj"));
        assert_eq!(config.namespace, DUMMY_NAMESPACE);
    }

    #[test]
    fn test_empty_instance_rejected() {
        let configuration =
            ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", " ");
        assert!(matches!(
            DummyConfig::from_configuration(&configuration),
            Err(ConnectorError::Configuration { .. })
        ));
    }

    #[test]
    fn test_missing_instance_rejected() {
        let configuration = ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE);
        assert!(DummyConfig::from_configuration(&configuration).is_err());
    }
}
