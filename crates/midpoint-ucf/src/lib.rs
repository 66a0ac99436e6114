//! # Unified Connector Framework
//!
//! Core abstractions between the provisioning engine and external
//! resources (LDAP directories, databases, ...).
//!
//! ## Architecture
//!
//! - [`ResourceSchema`] - object classes, attributes, identifiers and
//!   capabilities discovered from a resource
//! - [`ResourceObject`] - typed attribute map of one resource entity
//! - [`Operation`] - closed set of changes applied by `modify_object`
//! - [`ConnectorInstance`] - one configured connection to one resource
//! - [`ConnectorFactory`] - builder registry and instance cache
//!
//! ## Example
//!
//! ```ignore
//! use midpoint_ucf::prelude::*;
//!
//! let factory = ConnectorFactory::new();
//! factory.register(Arc::new(DummyConnectorBuilder::new(registry))).await;
//!
//! let handle = factory.get_or_create(&resource_oid, &configuration).await?;
//! let connector = handle.acquire().await;
//! let schema = connector.fetch_resource_schema().await?;
//! let account = schema
//!     .default_account_definition()
//!     .unwrap()
//!     .instantiate()
//!     .with_value(QName::icfs_name(), "uid=jack,ou=people,dc=example,dc=com");
//! let identifiers = connector.add_object(&account, &[]).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`qname`] - qualified names and well-known framework attributes
//! - [`types`] - connector type, modification and change kinds
//! - [`error`] - error taxonomy with transient/permanent classification
//! - [`schema`] - resource schema model
//! - [`object`] - resource objects, attribute values, identifiers
//! - [`operation`] - modify operations
//! - [`change`] - sync tokens and change records
//! - [`config`] - connector configuration
//! - [`resilience`] - retry with backoff, call timeouts
//! - [`traits`] - connector contract
//! - [`factory`] - connector factory

pub mod change;
pub mod config;
pub mod error;
pub mod factory;
pub mod object;
pub mod operation;
pub mod qname;
pub mod resilience;
pub mod schema;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::change::{Change, ChangeStream, SyncToken};
    pub use crate::config::{ConnectionSettings, ConnectorConfig, ConnectorConfiguration};
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::factory::{ConnectorFactory, ConnectorHandle, ConnectorInfo};
    pub use crate::object::{AttributeValue, Identifiers, Property, ResourceObject};
    pub use crate::operation::{
        deduplicate_adds, ActivationChange, AttributeModification, Operation, PasswordChange,
        ProtectedString,
    };
    pub use crate::qname::QName;
    pub use crate::resilience::{call_with_timeout, RetryConfig, RetryExecutor};
    pub use crate::schema::{
        ActivationCapability, Capabilities, CredentialsCapability, PropertyDefinition,
        ResourceObjectDefinition, ResourceSchema, ValueType,
    };
    pub use crate::traits::{ConnectorBuilder, ConnectorInstance};
    pub use crate::types::{ChangeType, ConnectorType, ModificationType};
}

pub use change::{Change, ChangeStream, SyncToken};
pub use config::{ConnectionSettings, ConnectorConfig, ConnectorConfiguration};
pub use error::{ConnectorError, ConnectorResult};
pub use factory::{ConnectorFactory, ConnectorHandle};
pub use object::{AttributeValue, Identifiers, Property, ResourceObject};
pub use operation::Operation;
pub use qname::QName;
pub use schema::{ResourceObjectDefinition, ResourceSchema};
pub use traits::{ConnectorBuilder, ConnectorInstance};

// Re-export async_trait for connector implementations
pub use async_trait::async_trait;
