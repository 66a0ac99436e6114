//! Connector error taxonomy
//!
//! Every failure a connector can report falls into one of these kinds.
//! The transient/permanent split drives retry decisions in the layers above.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Connector configuration is malformed or incomplete. Never retried.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Transient connectivity fault. Safe to retry with backoff.
    #[error("communication error: {message}")]
    Communication {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A bounded wait on a connector call expired.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// An object with matching identity already exists on the resource.
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// The addressed object does not exist on the resource.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// The request does not conform to the resource schema.
    #[error("schema violation: {message}")]
    Schema { message: String },

    /// Connector-internal fault.
    #[error("connector framework error: {message}")]
    GenericFramework {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The connector does not implement the requested operation.
    #[error("operation '{operation}' is not supported by connector '{connector_type}'")]
    Unsupported {
        operation: String,
        connector_type: String,
    },
}

impl ConnectorError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::Communication { .. } | ConnectorError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether this error is the "object is absent" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::ObjectNotFound { .. })
    }

    /// Whether this error is an identity conflict on create.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ConnectorError::ObjectAlreadyExists { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::Configuration { .. } => "CONFIGURATION",
            ConnectorError::Communication { .. } => "COMMUNICATION",
            ConnectorError::Timeout { .. } => "TIMEOUT",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_ALREADY_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::Schema { .. } => "SCHEMA",
            ConnectorError::GenericFramework { .. } => "GENERIC_FRAMEWORK",
            ConnectorError::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    // Convenience constructors

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ConnectorError::Configuration {
            message: message.into(),
        }
    }

    /// Create a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        ConnectorError::Communication {
            message: message.into(),
            source: None,
        }
    }

    /// Create a communication error with source.
    pub fn communication_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Communication {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        ConnectorError::Schema {
            message: message.into(),
        }
    }

    /// Create a generic framework error.
    pub fn framework(message: impl Into<String>) -> Self {
        ConnectorError::GenericFramework {
            message: message.into(),
            source: None,
        }
    }

    /// Create a generic framework error with source.
    pub fn framework_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::GenericFramework {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an object-not-found error.
    pub fn not_found(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectNotFound {
            identifier: identifier.into(),
        }
    }

    /// Create an object-already-exists error.
    pub fn already_exists(identifier: impl Into<String>) -> Self {
        ConnectorError::ObjectAlreadyExists {
            identifier: identifier.into(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let transient_errors = vec![
            ConnectorError::communication("connection refused"),
            ConnectorError::Timeout {
                operation: "fetch_object".to_string(),
                timeout_ms: 500,
            },
        ];

        for err in transient_errors {
            assert!(
                err.is_transient(),
                "Expected {} to be transient",
                err.error_code()
            );
            assert!(!err.is_permanent());
        }
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            ConnectorError::configuration("missing host"),
            ConnectorError::already_exists("uid=jack"),
            ConnectorError::not_found("uid=jack"),
            ConnectorError::schema("unknown attribute 'foo'"),
            ConnectorError::framework("NPE in connector"),
            ConnectorError::Unsupported {
                operation: "fetch_changes".to_string(),
                connector_type: "csv".to_string(),
            },
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ConnectorError::communication("x").error_code(),
            "COMMUNICATION"
        );
        assert_eq!(
            ConnectorError::already_exists("x").error_code(),
            "OBJECT_ALREADY_EXISTS"
        );
        assert_eq!(
            ConnectorError::not_found("x").error_code(),
            "OBJECT_NOT_FOUND"
        );
        assert_eq!(ConnectorError::schema("x").error_code(), "SCHEMA");
    }

    #[test]
    fn test_error_display() {
        let err = ConnectorError::already_exists("uid=jack,ou=people,dc=example,dc=com");
        assert_eq!(
            err.to_string(),
            "object already exists: uid=jack,ou=people,dc=example,dc=com"
        );

        let err = ConnectorError::Timeout {
            operation: "modify_object".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "modify_object timed out after 250 ms");
    }

    #[test]
    fn test_error_with_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::communication_with_source("LDAP bind failed", io_err);

        assert!(err.is_transient());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_classification_helpers() {
        assert!(ConnectorError::not_found("x").is_not_found());
        assert!(!ConnectorError::not_found("x").is_already_exists());
        assert!(ConnectorError::already_exists("x").is_already_exists());
    }
}
