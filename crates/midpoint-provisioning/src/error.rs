//! Provisioning error types.
//!
//! One enum per layer: repository, mapping, shadow, provisioning
//! (reconciliation and synchronization) and task runtime. Lower layers
//! convert into higher ones with `?`.

use midpoint_ucf::ConnectorError;
use thiserror::Error;

use crate::ids::Oid;
use crate::repository::ObjectType;
use crate::shadow::ShadowLifecycleState;

/// Errors raised by a repository implementation.
#[derive(Debug, Error)]
pub enum RepoError {
    /// No object with this OID.
    #[error("{object_type} not found: {oid}")]
    NotFound { object_type: ObjectType, oid: Oid },

    /// An object with this OID is already stored.
    #[error("{object_type} already exists: {oid}")]
    AlreadyExists { object_type: ObjectType, oid: Oid },

    /// Compare-and-set lost against a concurrent writer.
    #[error("Version conflict on {oid}: expected {expected}, found {actual}")]
    VersionConflict { oid: Oid, expected: u64, actual: u64 },

    /// Modification cannot be applied to the stored document.
    #[error("Invalid modification of '{path}': {message}")]
    InvalidModification { path: String, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepoError {
    /// Create an invalid modification error.
    pub fn invalid_modification(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidModification {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if the object was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    /// Check if this is a lost compare-and-set.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, RepoError::VersionConflict { .. })
    }

    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RepoError::NotFound { .. } => "REPOSITORY_NOT_FOUND",
            RepoError::AlreadyExists { .. } => "REPOSITORY_ALREADY_EXISTS",
            RepoError::VersionConflict { .. } => "REPOSITORY_VERSION_CONFLICT",
            RepoError::InvalidModification { .. } => "REPOSITORY_INVALID_MODIFICATION",
            RepoError::Serialization(_) => "REPOSITORY_SERIALIZATION",
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors evaluating outbound or inbound mappings.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Mapping targets an attribute the object class does not define.
    #[error("Unknown attribute '{attribute}'")]
    UnknownAttribute { attribute: String },

    /// Regex transform with an invalid pattern.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Lookup table has no entry and no default.
    #[error("No lookup entry for '{value}'")]
    LookupMiss { value: String },

    /// Value cannot be converted to the attribute's type.
    #[error("Value '{value}' is not a valid {expected} for '{attribute}'")]
    InvalidValue {
        attribute: String,
        value: String,
        expected: &'static str,
    },

    /// No mapping produced a value for the naming attribute.
    #[error("No value for naming attribute '{attribute}'")]
    MissingName { attribute: String },
}

impl MappingError {
    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            MappingError::UnknownAttribute { .. } => "MAPPING_UNKNOWN_ATTRIBUTE",
            MappingError::InvalidPattern { .. } => "MAPPING_INVALID_PATTERN",
            MappingError::LookupMiss { .. } => "MAPPING_LOOKUP_MISS",
            MappingError::InvalidValue { .. } => "MAPPING_INVALID_VALUE",
            MappingError::MissingName { .. } => "MAPPING_MISSING_NAME",
        }
    }
}

/// Result type for mapping evaluation.
pub type MappingResult<T> = Result<T, MappingError>;

/// Errors on shadow state handling.
#[derive(Debug, Error)]
pub enum ShadowError {
    /// Lifecycle transition not allowed.
    #[error("Invalid shadow transition from {from} to {to}")]
    InvalidTransition {
        from: ShadowLifecycleState,
        to: ShadowLifecycleState,
    },

    /// Resource reported a different primary identifier.
    #[error("Shadow {shadow} has identifier '{expected}', resource object has '{actual}'")]
    IdentifierMismatch {
        shadow: Oid,
        expected: String,
        actual: String,
    },

    /// Resource object lacks a value for the naming attribute.
    #[error("Resource object has no naming attribute value")]
    MissingName,
}

/// Result type for shadow operations.
pub type ShadowResult<T> = Result<T, ShadowError>;

/// Errors raised by reconciliation and synchronization.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Connector error.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Repository error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepoError),

    /// Mapping error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Shadow error.
    #[error("Shadow error: {0}")]
    Shadow(#[from] ShadowError),

    /// The account already exists on the resource.
    #[error("Conflict on resource {resource}: object '{identifier}' already exists")]
    Conflict { resource: Oid, identifier: String },

    /// Resource definition is unusable.
    #[error("Configuration error on resource {resource}: {message}")]
    Configuration { resource: Oid, message: String },
}

impl ProvisioningError {
    /// Create a configuration error.
    pub fn configuration(resource: Oid, message: impl Into<String>) -> Self {
        Self::Configuration {
            resource,
            message: message.into(),
        }
    }

    /// Check if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisioningError::Connector(e) if e.is_transient())
    }

    /// Check if this is an already-exists conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProvisioningError::Conflict { .. })
    }

    /// Stable error code recorded in operation results.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProvisioningError::Connector(e) => e.error_code(),
            ProvisioningError::Repository(e) => e.error_code(),
            ProvisioningError::Mapping(e) => e.error_code(),
            ProvisioningError::Shadow(_) => "SHADOW",
            ProvisioningError::Conflict { .. } => "OBJECT_ALREADY_EXISTS",
            ProvisioningError::Configuration { .. } => "CONFIGURATION",
        }
    }
}

/// Result type for provisioning operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Errors raised by the task runtime.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Repository error.
    #[error("Repository error: {0}")]
    Repository(#[from] RepoError),

    /// This node no longer holds the task's lease.
    #[error("Lease on task {task} is not held by this node")]
    LeaseLost { task: Oid },

    /// Task cannot run in its current state.
    #[error("Task {task} cannot run: {message}")]
    NotRunnable { task: Oid, message: String },

    /// No handler registered for the task's category.
    #[error("No handler for task category '{category}'")]
    NoHandler { category: String },
}

impl TaskError {
    /// Create a not runnable error.
    pub fn not_runnable(task: Oid, message: impl Into<String>) -> Self {
        Self::NotRunnable {
            task,
            message: message.into(),
        }
    }

    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            TaskError::Repository(e) => e.error_code(),
            TaskError::LeaseLost { .. } => "TASK_LEASE_LOST",
            TaskError::NotRunnable { .. } => "TASK_NOT_RUNNABLE",
            TaskError::NoHandler { .. } => "TASK_NO_HANDLER",
        }
    }
}

/// Result type for task runtime operations.
pub type TaskResult<T> = Result<T, TaskError>;
