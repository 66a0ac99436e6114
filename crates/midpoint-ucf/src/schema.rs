//! Resource Schema Model
//!
//! Describes the object classes a resource exposes, their attributes,
//! identifiers and the capabilities of the resource. Connectors produce a
//! [`ResourceSchema`] from schema discovery; everything above the connector
//! layer consumes it.

use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ConnectorResult};
use crate::object::{AttributeValue, Identifiers, ResourceObject};
use crate::qname::QName;

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// String/text value.
    String,
    /// Integer value.
    Integer,
    /// Boolean value.
    Boolean,
    /// Binary data.
    Binary,
}

impl ValueType {
    /// Check whether a value conforms to this type.
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (ValueType::String, AttributeValue::String(_))
                | (ValueType::Integer, AttributeValue::Integer(_))
                | (ValueType::Boolean, AttributeValue::Boolean(_))
                | (ValueType::Binary, AttributeValue::Binary(_))
        )
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Binary => "binary",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_occurs() -> Option<u32> {
    Some(1)
}

/// Definition of one attribute of an object class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: QName,

    pub value_type: ValueType,

    /// Minimum number of values. `1` makes the attribute required.
    #[serde(default)]
    pub min_occurs: u32,

    /// Maximum number of values; `None` means unbounded.
    #[serde(default = "default_max_occurs")]
    pub max_occurs: Option<u32>,

    /// Ignored attributes are neither mapped nor accepted in requests.
    #[serde(default)]
    pub ignored: bool,

    #[serde(default = "default_true")]
    pub can_read: bool,

    #[serde(default = "default_true")]
    pub can_create: bool,

    #[serde(default = "default_true")]
    pub can_update: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl PropertyDefinition {
    /// Create an optional single-valued attribute definition.
    pub fn new(name: QName, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            min_occurs: 0,
            max_occurs: Some(1),
            ignored: false,
            can_read: true,
            can_create: true,
            can_update: true,
            display_name: None,
        }
    }

    /// Mark this attribute as multi-valued.
    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.max_occurs = None;
        self
    }

    /// Mark this attribute as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.min_occurs = self.min_occurs.max(1);
        self
    }

    /// Mark this attribute as read-only (assigned by the resource).
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.can_create = false;
        self.can_update = false;
        self
    }

    /// Mark this attribute as write-only (e.g. passwords).
    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.can_read = false;
        self
    }

    /// Mark this attribute as ignored.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Whether more than one value is allowed.
    #[must_use]
    pub fn is_multi_valued(&self) -> bool {
        self.max_occurs.map_or(true, |max| max > 1)
    }

    /// Whether at least one value is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.min_occurs > 0
    }

    /// Check a value list against type and multiplicity.
    pub fn check_values(&self, values: &[AttributeValue]) -> ConnectorResult<()> {
        if let Some(bad) = values.iter().find(|v| !self.value_type.accepts(v)) {
            return Err(ConnectorError::schema(format!(
                "value '{bad}' of attribute {} is not of type {}",
                self.name, self.value_type
            )));
        }
        if let Some(max) = self.max_occurs {
            if values.len() > max as usize {
                return Err(ConnectorError::schema(format!(
                    "attribute {} allows at most {max} value(s), got {}",
                    self.name,
                    values.len()
                )));
            }
        }
        Ok(())
    }
}

/// Definition of one object class on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceObjectDefinition {
    pub type_name: QName,

    /// Object class name as known to the native system.
    pub native_object_class: String,

    /// Attribute definitions in discovery order.
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,

    /// Primary identifiers. Immutable once an object exists.
    #[serde(default)]
    pub identifiers: Vec<QName>,

    #[serde(default)]
    pub secondary_identifiers: Vec<QName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_attribute: Option<QName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_attribute: Option<QName>,

    /// Default object class for accounts on this resource.
    #[serde(default)]
    pub default_account: bool,
}

impl ResourceObjectDefinition {
    /// Create an empty object class definition.
    pub fn new(type_name: QName, native_object_class: impl Into<String>) -> Self {
        Self {
            type_name,
            native_object_class: native_object_class.into(),
            properties: Vec::new(),
            identifiers: Vec::new(),
            secondary_identifiers: Vec::new(),
            naming_attribute: None,
            display_name_attribute: None,
            default_account: false,
        }
    }

    /// Add an attribute definition.
    #[must_use]
    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a primary identifier. The attribute must also be defined.
    #[must_use]
    pub fn with_identifier(mut self, name: QName) -> Self {
        self.identifiers.push(name);
        self
    }

    /// Add a secondary identifier.
    #[must_use]
    pub fn with_secondary_identifier(mut self, name: QName) -> Self {
        self.secondary_identifiers.push(name);
        self
    }

    /// Set the naming attribute.
    #[must_use]
    pub fn with_naming_attribute(mut self, name: QName) -> Self {
        self.naming_attribute = Some(name);
        self
    }

    /// Mark as the default account object class.
    #[must_use]
    pub fn as_default_account(mut self) -> Self {
        self.default_account = true;
        self
    }

    /// Look up an attribute definition.
    pub fn find_property_definition(&self, name: &QName) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| &p.name == name)
    }

    /// Whether the attribute is a primary or secondary identifier.
    pub fn is_identifier(&self, name: &QName) -> bool {
        self.identifiers.contains(name) || self.secondary_identifiers.contains(name)
    }

    /// Primary then secondary identifier names.
    pub fn all_identifiers(&self) -> Vec<QName> {
        self.identifiers
            .iter()
            .chain(self.secondary_identifiers.iter())
            .cloned()
            .collect()
    }

    /// Create an empty object of this class.
    pub fn instantiate(&self) -> ResourceObject {
        ResourceObject::new(self.type_name.clone())
    }

    /// Extract identifier attributes from an object of this class.
    pub fn identifiers_of(&self, object: &ResourceObject) -> Identifiers {
        object.identifiers(&self.all_identifiers())
    }

    /// Validate an object about to be created.
    ///
    /// Identifiers assigned by the resource (read-only) may be absent.
    pub fn validate_for_create(&self, object: &ResourceObject) -> ConnectorResult<()> {
        if object.object_class != self.type_name {
            return Err(ConnectorError::schema(format!(
                "object class {} does not match definition {}",
                object.object_class, self.type_name
            )));
        }

        for (name, values) in &object.attributes {
            let definition = self.find_property_definition(name).ok_or_else(|| {
                ConnectorError::schema(format!(
                    "attribute {name} is not defined in object class {}",
                    self.type_name
                ))
            })?;
            if definition.ignored {
                return Err(ConnectorError::schema(format!(
                    "attribute {name} is ignored and cannot be set"
                )));
            }
            if !definition.can_create {
                return Err(ConnectorError::schema(format!(
                    "attribute {name} cannot be set on create"
                )));
            }
            definition.check_values(values)?;
        }

        for definition in self.properties.iter().filter(|p| p.is_required()) {
            if definition.can_create && !object.has(&definition.name) {
                return Err(ConnectorError::schema(format!(
                    "required attribute {} is missing",
                    definition.name
                )));
            }
        }

        Ok(())
    }
}

/// Activation capability: how the resource represents enabled/disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCapability {
    /// Attribute holding the enabled flag.
    pub attribute: QName,
}

/// Credentials capability: the resource accepts password changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsCapability {
    pub password_attribute: QName,
    /// Whether the current password can be read back.
    #[serde(default)]
    pub readable: bool,
}

/// Capabilities reported by the connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<ActivationCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsCapability>,

    #[serde(default)]
    pub live_sync: bool,

    #[serde(default)]
    pub test_connection: bool,
}

/// Complete schema of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Namespace of resource-specific attribute names.
    pub namespace: String,

    #[serde(default)]
    pub object_classes: Vec<ResourceObjectDefinition>,

    #[serde(default)]
    pub capabilities: Capabilities,
}

impl ResourceSchema {
    /// Create an empty schema.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            object_classes: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    /// Add an object class.
    #[must_use]
    pub fn with_object_class(mut self, definition: ResourceObjectDefinition) -> Self {
        self.object_classes.push(definition);
        self
    }

    /// Set capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Name in this resource's namespace.
    pub fn qname(&self, local_part: &str) -> QName {
        QName::new(self.namespace.clone(), local_part)
    }

    /// Look up an object class definition.
    pub fn find_object_class(&self, type_name: &QName) -> Option<&ResourceObjectDefinition> {
        self.object_classes.iter().find(|oc| &oc.type_name == type_name)
    }

    /// Look up an object class, failing with a schema error.
    pub fn require_object_class(&self, type_name: &QName) -> ConnectorResult<&ResourceObjectDefinition> {
        self.find_object_class(type_name).ok_or_else(|| {
            ConnectorError::schema(format!("object class {type_name} not found in resource schema"))
        })
    }

    /// The default account object class.
    pub fn default_account_definition(&self) -> Option<&ResourceObjectDefinition> {
        self.object_classes.iter().find(|oc| oc.default_account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://example.com/resource";

    fn account_definition() -> ResourceObjectDefinition {
        ResourceObjectDefinition::new(QName::new(NS, "AccountObjectClass"), "inetOrgPerson")
            .with_property(PropertyDefinition::new(QName::icfs_uid(), ValueType::String).read_only())
            .with_property(PropertyDefinition::new(QName::icfs_name(), ValueType::String).required())
            .with_property(PropertyDefinition::new(QName::new(NS, "sn"), ValueType::String))
            .with_property(
                PropertyDefinition::new(QName::new(NS, "street"), ValueType::String).multi_valued(),
            )
            .with_property(PropertyDefinition::new(QName::new(NS, "audit"), ValueType::String).ignored())
            .with_identifier(QName::icfs_uid())
            .with_secondary_identifier(QName::icfs_name())
            .with_naming_attribute(QName::icfs_name())
            .as_default_account()
    }

    #[test]
    fn test_property_multiplicity() {
        let single = PropertyDefinition::new(QName::new(NS, "sn"), ValueType::String);
        assert!(!single.is_multi_valued());
        assert!(!single.is_required());

        let multi = single.clone().multi_valued().required();
        assert!(multi.is_multi_valued());
        assert!(multi.is_required());
    }

    #[test]
    fn test_check_values() {
        let sn = PropertyDefinition::new(QName::new(NS, "sn"), ValueType::String);
        assert!(sn.check_values(&["Sparrow".into()]).is_ok());
        assert!(sn.check_values(&["a".into(), "b".into()]).is_err());
        assert!(sn.check_values(&[AttributeValue::Integer(1)]).is_err());
    }

    #[test]
    fn test_validate_for_create() {
        let definition = account_definition();
        let ok = definition
            .instantiate()
            .with_value(QName::icfs_name(), "uid=jack")
            .with_value(QName::new(NS, "sn"), "Sparrow");
        assert!(definition.validate_for_create(&ok).is_ok());

        let missing_name = definition
            .instantiate()
            .with_value(QName::new(NS, "sn"), "Sparrow");
        assert!(matches!(
            definition.validate_for_create(&missing_name),
            Err(ConnectorError::Schema { .. })
        ));

        let unknown = ok.clone().with_value(QName::new(NS, "shoeSize"), "42");
        assert!(definition.validate_for_create(&unknown).is_err());

        let ignored = ok.clone().with_value(QName::new(NS, "audit"), "x");
        assert!(definition.validate_for_create(&ignored).is_err());

        let uid_set = ok.with_value(QName::icfs_uid(), "1");
        assert!(definition.validate_for_create(&uid_set).is_err());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = ResourceSchema::new(NS).with_object_class(account_definition());
        let account = schema.default_account_definition().unwrap();
        assert_eq!(account.type_name, schema.qname("AccountObjectClass"));
        assert!(schema.find_object_class(&schema.qname("GroupObjectClass")).is_none());
        assert!(schema.require_object_class(&schema.qname("GroupObjectClass")).is_err());
        assert!(account.is_identifier(&QName::icfs_name()));
        assert_eq!(account.all_identifiers(), vec![QName::icfs_uid(), QName::icfs_name()]);
    }

    #[test]
    fn test_schema_serde_roundtrip() {
        let schema = ResourceSchema::new(NS)
            .with_object_class(account_definition())
            .with_capabilities(Capabilities {
                activation: Some(ActivationCapability {
                    attribute: QName::icfs_enable(),
                }),
                credentials: None,
                live_sync: true,
                test_connection: true,
            });
        let json = serde_json::to_value(&schema).unwrap();
        let back: ResourceSchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }
}
