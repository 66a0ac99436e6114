//! Dummy connector implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use midpoint_ucf::change::{Change, ChangeStream, SyncToken};
use midpoint_ucf::config::{ConnectorConfig, ConnectorConfiguration};
use midpoint_ucf::error::{ConnectorError, ConnectorResult};
use midpoint_ucf::object::{AttributeValue, Identifiers, Property, ResourceObject};
use midpoint_ucf::operation::Operation;
use midpoint_ucf::qname::{QName, ICFS_ENABLE, ICFS_NAME, ICFS_NS, ICFS_PASSWORD};
use midpoint_ucf::schema::{ResourceObjectDefinition, ResourceSchema};
use midpoint_ucf::traits::{ConnectorBuilder, ConnectorInstance};
use midpoint_ucf::types::{ChangeType, ConnectorType, ModificationType};

use crate::config::{DummyConfig, DUMMY_CONNECTOR_TYPE};
use crate::resource::{DummyAccount, DummyOperation, DummyResource, DummyResourceRegistry};
use crate::schema_definitions::{account_definition, resource_schema};

struct Binding {
    config: DummyConfig,
    resource: Arc<DummyResource>,
    account: ResourceObjectDefinition,
}

/// Connector for in-memory dummy resources.
///
/// Operations inside one modify request are applied in the order given.
pub struct DummyConnector {
    registry: DummyResourceRegistry,
    binding: Option<Binding>,
}

impl DummyConnector {
    /// Create an unconfigured connector.
    pub fn new(registry: DummyResourceRegistry) -> Self {
        Self {
            registry,
            binding: None,
        }
    }

    fn binding(&self) -> ConnectorResult<&Binding> {
        self.binding
            .as_ref()
            .ok_or_else(|| ConnectorError::configuration("dummy connector is not configured"))
    }

    fn account_definition(&self, object_class: &QName) -> ConnectorResult<&Binding> {
        let binding = self.binding()?;
        if &binding.account.type_name != object_class {
            return Err(ConnectorError::schema(format!(
                "unknown object class {object_class}"
            )));
        }
        Ok(binding)
    }

    async fn resolve_uid(&self, binding: &Binding, identifiers: &Identifiers) -> ConnectorResult<String> {
        if let Some(uid) = identifiers.uid_value() {
            return Ok(uid.to_string());
        }
        let name = identifiers
            .find(&QName::icfs_name())
            .and_then(Property::first_str)
            .ok_or_else(|| {
                ConnectorError::schema(format!("no usable identifier in {identifiers}"))
            })?;
        binding
            .resource
            .account_by_name(name)
            .await
            .map(|a| a.uid)
            .ok_or_else(|| ConnectorError::not_found(name))
    }
}

/// Convert a native account into a resource object.
fn to_resource_object(binding: &Binding, account: &DummyAccount) -> ResourceObject {
    let mut object = binding
        .account
        .instantiate()
        .with_value(QName::icfs_uid(), account.uid.clone())
        .with_value(QName::icfs_name(), account.name.clone())
        .with_value(QName::icfs_enable(), account.enabled);
    for (local, values) in &account.attributes {
        let name = QName::new(binding.config.namespace.clone(), local.clone());
        let readable = binding
            .account
            .find_property_definition(&name)
            .is_some_and(|d| d.can_read && !d.ignored);
        if readable {
            object.set(name, values.clone());
        }
    }
    object
}

fn identifiers_of(account: &DummyAccount) -> Identifiers {
    Identifiers::uid(account.uid.clone())
        .with(Property::single(QName::icfs_name(), account.name.clone()))
}

fn single_string(name: &QName, values: &[AttributeValue]) -> ConnectorResult<String> {
    match values {
        [AttributeValue::String(s)] => Ok(s.clone()),
        _ => Err(ConnectorError::schema(format!(
            "attribute {name} requires exactly one string value"
        ))),
    }
}

fn single_bool(name: &QName, values: &[AttributeValue]) -> ConnectorResult<bool> {
    match values {
        [AttributeValue::Boolean(b)] => Ok(*b),
        _ => Err(ConnectorError::schema(format!(
            "attribute {name} requires exactly one boolean value"
        ))),
    }
}

/// Apply one attribute modification to a native account.
fn apply_attribute(
    binding: &Binding,
    account: &mut DummyAccount,
    change_type: ModificationType,
    property: &Property,
) -> ConnectorResult<()> {
    let name = &property.name;
    let definition = binding
        .account
        .find_property_definition(name)
        .ok_or_else(|| ConnectorError::schema(format!("attribute {name} is not defined")))?;
    if definition.ignored || !definition.can_update {
        return Err(ConnectorError::schema(format!(
            "attribute {name} cannot be modified"
        )));
    }
    definition.check_values(&property.values).or_else(|e| {
        // Multiplicity of the request itself is irrelevant for delete.
        if change_type == ModificationType::Delete {
            Ok(())
        } else {
            Err(e)
        }
    })?;

    if name.namespace() == ICFS_NS {
        return match (name.local_part(), change_type) {
            (ICFS_NAME, ModificationType::Replace) => {
                account.name = single_string(name, &property.values)?;
                Ok(())
            }
            (ICFS_PASSWORD, ModificationType::Replace) => {
                account.password = Some(single_string(name, &property.values)?);
                Ok(())
            }
            (ICFS_ENABLE, ModificationType::Replace) => {
                account.enabled = single_bool(name, &property.values)?;
                Ok(())
            }
            _ => Err(ConnectorError::schema(format!(
                "attribute {name} only supports replace"
            ))),
        };
    }

    let local = name.local_part();
    let mut values = account.values(local).to_vec();
    match change_type {
        ModificationType::Replace => values = property.values.clone(),
        ModificationType::Add => {
            if definition.is_multi_valued() {
                values.extend(property.values.iter().cloned());
            } else {
                for value in &property.values {
                    match values.first() {
                        None => values.push(value.clone()),
                        Some(existing) if existing == value => {}
                        Some(_) => {
                            return Err(ConnectorError::schema(format!(
                                "single-valued attribute {name} already has a value"
                            )))
                        }
                    }
                }
            }
        }
        ModificationType::Delete => {
            for value in &property.values {
                if let Some(pos) = values.iter().position(|v| v == value) {
                    values.remove(pos);
                }
            }
        }
    }
    definition.check_values(&values)?;
    if values.is_empty() && definition.is_required() {
        return Err(ConnectorError::schema(format!(
            "required attribute {name} cannot be emptied"
        )));
    }
    account.set(local, values);
    Ok(())
}

fn apply_operation(binding: &Binding, account: &mut DummyAccount, operation: &Operation) -> ConnectorResult<()> {
    match operation {
        Operation::Attribute(m) => apply_attribute(binding, account, m.change_type, &m.property),
        Operation::Password(p) => {
            account.password = Some(p.new_password.expose().to_string());
            Ok(())
        }
        Operation::Activation(a) => {
            account.enabled = a.enabled;
            Ok(())
        }
    }
}

#[async_trait]
impl ConnectorInstance for DummyConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::new(DUMMY_CONNECTOR_TYPE)
    }

    async fn configure(&mut self, configuration: &ConnectorConfiguration) -> ConnectorResult<()> {
        let config = DummyConfig::from_configuration(configuration)?;
        let resource = self.registry.get_or_create(&config.instance).await;
        debug!(instance = %config.instance, "Dummy connector configured");
        self.binding = Some(Binding {
            account: account_definition(&config.namespace),
            config,
            resource,
        });
        Ok(())
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        let binding = self.binding()?;
        binding.resource.check_fault(DummyOperation::Schema).await
    }

    async fn fetch_resource_schema(&self) -> ConnectorResult<ResourceSchema> {
        let binding = self.binding()?;
        binding.resource.check_fault(DummyOperation::Schema).await?;
        Ok(resource_schema(&binding.config.namespace))
    }

    #[instrument(skip(self, object, additional), fields(object_class = %object.object_class))]
    async fn add_object(
        &self,
        object: &ResourceObject,
        additional: &[Operation],
    ) -> ConnectorResult<Identifiers> {
        let binding = self.account_definition(&object.object_class)?;
        binding.account.validate_for_create(object)?;
        binding.resource.check_fault(DummyOperation::Add).await?;

        let name = single_string(
            &QName::icfs_name(),
            object.values(&QName::icfs_name()),
        )?;
        let mut account = DummyAccount::new(name);
        for property in object.properties() {
            if property.name == QName::icfs_name() {
                continue;
            }
            apply_attribute(binding, &mut account, ModificationType::Replace, &property)?;
        }
        for operation in additional {
            apply_operation(binding, &mut account, operation)?;
        }

        let uid = binding.resource.add_account(account.clone()).await?;
        account.uid = uid;
        debug!(uid = %account.uid, name = %account.name, "Account created");
        Ok(identifiers_of(&account))
    }

    #[instrument(skip(self, operations), fields(identifiers = %identifiers, count = operations.len()))]
    async fn modify_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
        operations: &[Operation],
    ) -> ConnectorResult<()> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::Modify).await?;
        if operations.iter().any(|op| op.attribute_name() == Some(&QName::icfs_uid())) {
            return Err(ConnectorError::schema("attribute __UID__ is immutable"));
        }
        let uid = self.resolve_uid(binding, identifiers).await?;
        binding
            .resource
            .modify_account(&uid, |account| {
                operations
                    .iter()
                    .try_for_each(|op| apply_operation(binding, account, op))
            })
            .await
    }

    #[instrument(skip(self), fields(identifiers = %identifiers))]
    async fn delete_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
    ) -> ConnectorResult<()> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::Delete).await?;
        let uid = self.resolve_uid(binding, identifiers).await?;
        binding.resource.delete_account(&uid).await
    }

    async fn fetch_object(
        &self,
        object_class: &QName,
        identifiers: &Identifiers,
    ) -> ConnectorResult<ResourceObject> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::Fetch).await?;
        let uid = self.resolve_uid(binding, identifiers).await?;
        let account = binding
            .resource
            .account_by_uid(&uid)
            .await
            .ok_or_else(|| ConnectorError::not_found(uid))?;
        Ok(to_resource_object(binding, &account))
    }

    async fn search_objects(&self, object_class: &QName) -> ConnectorResult<Vec<ResourceObject>> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::Search).await?;
        Ok(binding
            .resource
            .accounts()
            .await
            .iter()
            .map(|account| to_resource_object(binding, account))
            .collect())
    }

    async fn fetch_current_token(&self, object_class: &QName) -> ConnectorResult<SyncToken> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::CurrentToken).await?;
        Ok(SyncToken::sequence(binding.resource.last_sequence().await))
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn fetch_changes(
        &self,
        object_class: &QName,
        since: &SyncToken,
    ) -> ConnectorResult<ChangeStream> {
        let binding = self.account_definition(object_class)?;
        binding.resource.check_fault(DummyOperation::FetchChanges).await?;
        let since = since.as_sequence().ok_or_else(|| {
            ConnectorError::framework(format!("unrecognised sync token {since}"))
        })?;

        let changes: Vec<Change> = binding
            .resource
            .changes_since(since)
            .await
            .into_iter()
            .map(|(entry, account)| {
                let identifiers = match &account {
                    Some(account) => identifiers_of(account),
                    None => Identifiers::uid(entry.uid.clone()),
                };
                let change = Change::new(
                    entry.change_type,
                    object_class.clone(),
                    identifiers,
                    SyncToken::sequence(entry.sequence),
                );
                match account {
                    Some(account) if entry.change_type != ChangeType::Delete => {
                        change.with_current_object(to_resource_object(binding, &account))
                    }
                    _ => change,
                }
            })
            .collect();

        debug!(count = changes.len(), "Fetched changes");
        Ok(ChangeStream::new(changes))
    }
}

impl std::fmt::Debug for DummyConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyConnector")
            .field("instance", &self.binding.as_ref().map(|b| b.config.instance.as_str()))
            .finish()
    }
}

/// Builds [`DummyConnector`] instances sharing one resource registry.
#[derive(Debug, Clone)]
pub struct DummyConnectorBuilder {
    registry: DummyResourceRegistry,
}

impl DummyConnectorBuilder {
    pub fn new(registry: DummyResourceRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ConnectorBuilder for DummyConnectorBuilder {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::new(DUMMY_CONNECTOR_TYPE)
    }

    fn display_name(&self) -> &str {
        "Dummy in-memory connector"
    }

    async fn build(&self) -> ConnectorResult<Box<dyn ConnectorInstance>> {
        Ok(Box::new(DummyConnector::new(self.registry.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DUMMY_NAMESPACE;

    fn ri(local: &str) -> QName {
        QName::new(DUMMY_NAMESPACE, local)
    }

    async fn configured() -> (DummyConnector, Arc<DummyResource>) {
        let registry = DummyResourceRegistry::new();
        let mut connector = DummyConnector::new(registry.clone());
        connector
            .configure(&ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", "unit"))
            .await
            .unwrap();
        let resource = registry.get("unit").await.unwrap();
        (connector, resource)
    }

    fn account_oc() -> QName {
        ri("AccountObjectClass")
    }

    #[tokio::test]
    async fn test_unconfigured_connector_fails() {
        let connector = DummyConnector::new(DummyResourceRegistry::new());
        let err = connector.fetch_resource_schema().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_object_class() {
        let (connector, _) = configured().await;
        let err = connector
            .fetch_object(&ri("GroupObjectClass"), &Identifiers::uid("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Schema { .. }));
    }

    #[tokio::test]
    async fn test_add_with_password_and_activation() {
        let (connector, resource) = configured().await;
        let object = ResourceObject::new(account_oc())
            .with_value(QName::icfs_name(), "jack")
            .with_value(ri("sn"), "Sparrow");

        let ids = connector
            .add_object(&object, &[Operation::password("deadmentellnotales"), Operation::activation(false)])
            .await
            .unwrap();

        let account = resource.account_by_uid(ids.uid_value().unwrap()).await.unwrap();
        assert_eq!(account.password.as_deref(), Some("deadmentellnotales"));
        assert!(!account.enabled);

        let fetched = connector.fetch_object(&account_oc(), &ids).await.unwrap();
        assert!(!fetched.has(&QName::icfs_password()));
        assert_eq!(fetched.values(&QName::icfs_enable()), &[AttributeValue::Boolean(false)]);
    }

    #[tokio::test]
    async fn test_single_valued_add_conflict() {
        let (connector, _) = configured().await;
        let object = ResourceObject::new(account_oc())
            .with_value(QName::icfs_name(), "jack")
            .with_value(ri("sn"), "Sparrow");
        let ids = connector.add_object(&object, &[]).await.unwrap();

        let err = connector
            .modify_object(&account_oc(), &ids, &[Operation::add(ri("sn"), ["Smith"])])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Schema { .. }));

        // Adding the value already present is a no-op
        connector
            .modify_object(&account_oc(), &ids, &[Operation::add(ri("sn"), ["Sparrow"])])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_uid_is_immutable() {
        let (connector, _) = configured().await;
        let object = ResourceObject::new(account_oc()).with_value(QName::icfs_name(), "jack");
        let ids = connector.add_object(&object, &[]).await.unwrap();

        let err = connector
            .modify_object(&account_oc(), &ids, &[Operation::replace(QName::icfs_uid(), ["x"])])
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Schema { .. }));
    }

    #[tokio::test]
    async fn test_rename_and_lookup_by_name() {
        let (connector, _) = configured().await;
        let object = ResourceObject::new(account_oc()).with_value(QName::icfs_name(), "jack");
        let ids = connector.add_object(&object, &[]).await.unwrap();

        connector
            .modify_object(&account_oc(), &ids, &[Operation::replace(QName::icfs_name(), ["captain"])])
            .await
            .unwrap();

        let by_name = Identifiers::new().with(Property::single(QName::icfs_name(), "CAPTAIN"));
        let fetched = connector.fetch_object(&account_oc(), &by_name).await.unwrap();
        assert_eq!(fetched.single_string(&QName::icfs_uid()), ids.uid_value());
    }

    #[tokio::test]
    async fn test_token_rejects_foreign_format() {
        let (connector, _) = configured().await;
        let err = connector
            .fetch_changes(&account_oc(), &SyncToken::new(serde_json::json!("cookie")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::GenericFramework { .. }));
    }

    #[tokio::test]
    async fn test_builder_produces_dummy_connector() {
        let builder = DummyConnectorBuilder::new(DummyResourceRegistry::new());
        let connector = builder.build().await.unwrap();
        assert_eq!(connector.connector_type().as_str(), DUMMY_CONNECTOR_TYPE);
    }
}
