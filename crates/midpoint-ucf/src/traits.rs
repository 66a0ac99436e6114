//! Connector Instance contract
//!
//! A [`ConnectorInstance`] wraps one configured connection to one external
//! resource. Instances are not required to support concurrent use; the
//! factory hands them out behind an exclusive lock.

use async_trait::async_trait;

use crate::change::{ChangeStream, SyncToken};
use crate::config::ConnectorConfiguration;
use crate::error::ConnectorResult;
use crate::object::{Identifiers, ResourceObject};
use crate::operation::Operation;
use crate::qname::QName;
use crate::schema::ResourceSchema;
use crate::types::ConnectorType;

/// One configured connection to an external resource.
#[async_trait]
pub trait ConnectorInstance: Send + Sync {
    /// Connector implementation this instance belongs to.
    fn connector_type(&self) -> ConnectorType;

    /// Validate and bind connection parameters.
    ///
    /// Fails with `Configuration` on malformed or incomplete configuration.
    async fn configure(&mut self, configuration: &ConnectorConfiguration) -> ConnectorResult<()>;

    /// Check that the resource is reachable with the bound configuration.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Discover object classes, attributes, identifiers and capabilities.
    async fn fetch_resource_schema(&self) -> ConnectorResult<ResourceSchema>;

    /// Create an object. `additional` carries operations that cannot be
    /// expressed as plain attributes (password, activation).
    ///
    /// Returns the identifiers assigned by the resource.
    async fn add_object(
        &self,
        object: &ResourceObject,
        additional: &[Operation],
    ) -> ConnectorResult<Identifiers>;

    /// Apply an unordered set of operations to an existing object.
    async fn modify_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
        operations: &[Operation],
    ) -> ConnectorResult<()>;

    /// Remove an object. Fails with `ObjectNotFound` if it is absent.
    async fn delete_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
    ) -> ConnectorResult<()>;

    /// Read the current state of an object.
    async fn fetch_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
    ) -> ConnectorResult<ResourceObject>;

    /// Enumerate all objects of a class.
    async fn search_objects(&self, object_class: &QName) -> ConnectorResult<Vec<ResourceObject>>;

    /// Current end of the change log.
    async fn fetch_current_token(&self, object_class: &QName) -> ConnectorResult<SyncToken>;

    /// Changes recorded after `since`, in log order.
    async fn fetch_changes(
        &self,
        object_class: &QName,
        since: &SyncToken,
    ) -> ConnectorResult<ChangeStream>;

    /// Release native resources. The instance must not be used afterwards.
    async fn dispose(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Creates unconfigured connector instances of one type.
#[async_trait]
pub trait ConnectorBuilder: Send + Sync {
    /// Connector type produced by this builder.
    fn connector_type(&self) -> ConnectorType;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Create a fresh, unconfigured instance.
    async fn build(&self) -> ConnectorResult<Box<dyn ConnectorInstance>>;
}
