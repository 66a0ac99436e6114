//! # Dummy Connector
//!
//! In-memory reference connector for midPoint provisioning.
//!
//! The connector talks to a [`DummyResource`], an in-process directory
//! that assigns identifiers, keeps a sequential change log for live sync
//! and supports fault injection. Resources are looked up by instance name
//! in a shared [`DummyResourceRegistry`], so tests can reach "behind" the
//! connector and change accounts natively.
//!
//! ## Example
//!
//! ```ignore
//! use midpoint_connector_dummy::{DummyConnectorBuilder, DummyResourceRegistry};
//! use midpoint_ucf::prelude::*;
//!
//! let registry = DummyResourceRegistry::new();
//! let factory = ConnectorFactory::new();
//! factory.register(Arc::new(DummyConnectorBuilder::new(registry.clone()))).await;
//!
//! let configuration = ConnectorConfiguration::new("dummy").with_property("instance", "opendj");
//! let handle = factory.get_or_create("resource-oid", &configuration).await?;
//! ```

pub mod config;
pub mod connector;
pub mod resource;
mod schema_definitions;

// Re-exports
pub use config::{DummyConfig, DUMMY_CONNECTOR_TYPE, DUMMY_NAMESPACE};
pub use connector::{DummyConnector, DummyConnectorBuilder};
pub use resource::{
    DummyAccount, DummyOperation, DummyResource, DummyResourceRegistry, FaultKind, LogEntry,
};
pub use schema_definitions::{
    account_definition, resource_schema, ACCOUNT_OBJECT_CLASS, ATTR_CN, ATTR_DESCRIPTION,
    ATTR_EMPLOYEE_NUMBER, ATTR_GIVEN_NAME, ATTR_LOCALITY, ATTR_MAIL, ATTR_SN, ATTR_STREET,
};
