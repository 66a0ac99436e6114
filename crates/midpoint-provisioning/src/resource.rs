//! Resource definitions.
//!
//! A [`Resource`] binds a connector configuration to the schema discovered
//! from it, the outbound mappings used to build accounts and the
//! synchronization policy. [`ResourceManager`] resolves a resource to a
//! ready-to-use connector handle, fetching and storing the schema the first
//! time it is needed.

use midpoint_ucf::config::ConnectorConfiguration;
use midpoint_ucf::factory::{ConnectorFactory, ConnectorHandle};
use midpoint_ucf::qname::QName;
use midpoint_ucf::resilience::call_with_timeout;
use midpoint_ucf::schema::{ResourceObjectDefinition, ResourceSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::ids::Oid;
use crate::mapping::{resolve_attribute, InboundMapping, OutboundMapping};
use crate::repository::{ItemModification, ObjectType, Repository, RepositoryExt, RepositoryObject};
use crate::result::OperationResult;

fn default_true() -> bool {
    true
}

/// How accounts of one object class are built and cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaHandling {
    /// Object class local name; the default account class when absent.
    #[serde(default)]
    pub object_class: Option<String>,

    #[serde(default)]
    pub outbound: Vec<OutboundMapping>,

    /// Attributes stored in shadows besides identifiers.
    #[serde(default)]
    pub cached_attributes: Vec<String>,
}

/// Reaction to a resource account without a shadow owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReaction {
    /// Create a user from inbound mappings and link it.
    #[default]
    CreateFocus,
    /// Keep the shadow unmatched.
    Ignore,
}

/// Reaction to an account deleted on the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletedReaction {
    /// Remove the shadow and the owner's link to it.
    #[default]
    Unlink,
    /// Delete the owner, cascading to its other accounts.
    DeleteFocus,
}

/// Synchronization policy of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub unmatched: UnmatchedReaction,

    #[serde(default)]
    pub deleted: DeletedReaction,

    /// Must include a mapping to `name` for users to be created.
    #[serde(default)]
    pub inbound: Vec<InboundMapping>,
}

impl Default for SynchronizationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            unmatched: UnmatchedReaction::default(),
            deleted: DeletedReaction::default(),
            inbound: Vec::new(),
        }
    }
}

/// A target system definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub oid: Oid,

    pub name: String,

    pub connector: ConnectorConfiguration,

    /// Schema as last fetched from the connector.
    #[serde(default)]
    pub schema: Option<ResourceSchema>,

    #[serde(default)]
    pub schema_handling: SchemaHandling,

    #[serde(default)]
    pub synchronization: Option<SynchronizationPolicy>,
}

impl Resource {
    pub fn new(name: impl Into<String>, connector: ConnectorConfiguration) -> Self {
        Self {
            oid: Oid::new(),
            name: name.into(),
            connector,
            schema: None,
            schema_handling: SchemaHandling::default(),
            synchronization: None,
        }
    }

    #[must_use]
    pub fn with_outbound(mut self, mapping: OutboundMapping) -> Self {
        self.schema_handling.outbound.push(mapping);
        self
    }

    #[must_use]
    pub fn with_cached_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.schema_handling.cached_attributes.push(attribute.into());
        self
    }

    #[must_use]
    pub fn with_synchronization(mut self, policy: SynchronizationPolicy) -> Self {
        self.synchronization = Some(policy);
        self
    }
}

impl RepositoryObject for Resource {
    const OBJECT_TYPE: ObjectType = ObjectType::Resource;

    fn oid(&self) -> Oid {
        self.oid
    }
}

/// A resource with its schema and a connector handle.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub resource: Resource,
    pub schema: ResourceSchema,
    pub handle: ConnectorHandle,
}

impl ResolvedResource {
    pub fn oid(&self) -> Oid {
        self.resource.oid
    }

    /// Definition of the managed account object class.
    pub fn account_definition(&self) -> ProvisioningResult<&ResourceObjectDefinition> {
        let found = match &self.resource.schema_handling.object_class {
            Some(local) => self.schema.find_object_class(&self.schema.qname(local)),
            None => self.schema.default_account_definition(),
        };
        found.ok_or_else(|| {
            ProvisioningError::configuration(self.oid(), "account object class not found in schema")
        })
    }

    /// Cached attribute names resolved against the schema namespace.
    pub fn cached_attributes(&self) -> Vec<QName> {
        self.resource
            .schema_handling
            .cached_attributes
            .iter()
            .map(|a| resolve_attribute(&self.schema.namespace, a))
            .collect()
    }

    pub fn namespace(&self) -> &str {
        &self.schema.namespace
    }

    pub fn synchronization(&self) -> SynchronizationPolicy {
        self.resource.synchronization.clone().unwrap_or_default()
    }
}

/// Resolves resources to connectors.
pub struct ResourceManager {
    factory: Arc<ConnectorFactory>,
}

impl ResourceManager {
    pub fn new(factory: Arc<ConnectorFactory>) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &Arc<ConnectorFactory> {
        &self.factory
    }

    /// Load a resource and make its connector and schema available.
    ///
    /// The schema is fetched from the connector once and stored on the
    /// resource.
    #[instrument(skip(self, repository))]
    pub async fn resolve(
        &self,
        repository: &dyn Repository,
        oid: &Oid,
    ) -> ProvisioningResult<ResolvedResource> {
        let resource: Resource = repository.get(oid).await?;
        let handle = self
            .factory
            .get_or_create(&oid.to_string(), &resource.connector)
            .await?;

        let schema = match &resource.schema {
            Some(schema) => schema.clone(),
            None => {
                let schema = fetch_schema(&handle).await?;
                repository
                    .modify_object(
                        ObjectType::Resource,
                        oid,
                        &[ItemModification::replace(
                            "schema",
                            serde_json::to_value(&schema).map_err(crate::error::RepoError::from)?,
                        )],
                    )
                    .await?;
                info!(resource = %resource.name, object_classes = schema.object_classes.len(), "Resource schema cached");
                schema
            }
        };

        Ok(ResolvedResource {
            resource,
            schema,
            handle,
        })
    }

    /// Check connectivity and schema discovery of a resource.
    #[instrument(skip(self, repository))]
    pub async fn test_resource(&self, repository: &dyn Repository, oid: &Oid) -> OperationResult {
        let mut result = OperationResult::new("resource.test").with_param("resource", oid);

        let resource: Resource = match repository.get(oid).await {
            Ok(resource) => resource,
            Err(e) => {
                result.record_fatal_error(e.error_code(), &e);
                return result;
            }
        };

        let handle = {
            let sub = result.subresult("connector.initialize");
            match self
                .factory
                .get_or_create(&oid.to_string(), &resource.connector)
                .await
            {
                Ok(handle) => {
                    sub.record_success();
                    handle
                }
                Err(e) => {
                    sub.record_fatal_error(e.error_code(), &e);
                    result.compute_status();
                    return result;
                }
            }
        };

        let timeout = handle.settings().operation_timeout();
        let connector = handle.acquire().await;
        let sub = result.subresult("connector.test_connection");
        match call_with_timeout("test_connection", timeout, connector.test_connection()).await {
            Ok(()) => sub.record_success(),
            Err(e) => sub.record_fatal_error(e.error_code(), &e),
        }
        let sub = result.subresult("connector.fetch_schema");
        match call_with_timeout("fetch_resource_schema", timeout, connector.fetch_resource_schema()).await {
            Ok(schema) if schema.default_account_definition().is_some() => sub.record_success(),
            Ok(_) => sub.record_warning("schema has no default account object class"),
            Err(e) => sub.record_fatal_error(e.error_code(), &e),
        }
        drop(connector);

        result.compute_status();
        result
    }

    /// Drop the cached schema and connector so the next use rediscovers
    /// both.
    pub async fn refresh(&self, repository: &dyn Repository, oid: &Oid) -> ProvisioningResult<()> {
        repository
            .modify_object(ObjectType::Resource, oid, &[ItemModification::replace("schema", serde_json::Value::Null)])
            .await?;
        self.factory.invalidate(&oid.to_string()).await;
        Ok(())
    }
}

async fn fetch_schema(handle: &ConnectorHandle) -> ProvisioningResult<ResourceSchema> {
    let timeout = handle.settings().operation_timeout();
    let retry = midpoint_ucf::resilience::RetryExecutor::new(handle.settings().retry_config());
    let connector = handle.acquire().await;
    let schema = retry
        .execute(|| call_with_timeout("fetch_resource_schema", timeout, connector.fetch_resource_schema()))
        .await?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use midpoint_connector_dummy::{
        DummyConnectorBuilder, DummyOperation, DummyResourceRegistry, FaultKind,
        DUMMY_CONNECTOR_TYPE,
    };

    async fn setup(instance: &str) -> (InMemoryRepository, ResourceManager, Resource, DummyResourceRegistry) {
        let registry = DummyResourceRegistry::new();
        let factory = Arc::new(ConnectorFactory::new());
        factory
            .register(Arc::new(DummyConnectorBuilder::new(registry.clone())))
            .await;
        let repo = InMemoryRepository::new();
        let resource = Resource::new(
            "Dummy",
            ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", instance),
        )
        .with_cached_attribute("l");
        repo.add(&resource).await.unwrap();
        (repo, ResourceManager::new(factory), resource, registry)
    }

    #[tokio::test]
    async fn test_resolve_caches_schema_on_resource() {
        let (repo, manager, resource, _) = setup("resolve").await;

        let resolved = manager.resolve(&repo, &resource.oid).await.unwrap();
        let definition = resolved.account_definition().unwrap();
        assert!(definition.default_account);
        assert_eq!(resolved.cached_attributes(), vec![resolved.schema.qname("l")]);

        let stored: Resource = repo.get(&resource.oid).await.unwrap();
        assert_eq!(stored.schema.as_ref(), Some(&resolved.schema));
    }

    #[tokio::test]
    async fn test_unknown_object_class_is_configuration_error() {
        let (repo, manager, mut resource, _) = setup("bad-class").await;
        resource.schema_handling.object_class = Some("GroupObjectClass".into());
        repo.update(&resource).await.unwrap();

        let resolved = manager.resolve(&repo, &resource.oid).await.unwrap();
        let err = resolved.account_definition().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");
    }

    #[tokio::test]
    async fn test_test_resource_reports_per_step() {
        let (repo, manager, resource, registry) = setup("test-resource").await;
        let result = manager.test_resource(&repo, &resource.oid).await;
        assert!(result.is_success());
        assert_eq!(result.subresults.len(), 3);

        let dummy = registry.get("test-resource").await.unwrap();
        dummy
            .inject_fault(DummyOperation::Schema, FaultKind::GenericFramework)
            .await;
        let result = manager.test_resource(&repo, &resource.oid).await;
        assert!(result.is_error());
        assert_eq!(result.failures()[0].operation, "connector.test_connection");
    }
}
