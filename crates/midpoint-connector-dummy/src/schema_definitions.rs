//! Static schema of the dummy resource.

use midpoint_ucf::qname::QName;
use midpoint_ucf::schema::{
    ActivationCapability, Capabilities, CredentialsCapability, PropertyDefinition,
    ResourceObjectDefinition, ResourceSchema, ValueType,
};

/// Local name of the account object class.
pub const ACCOUNT_OBJECT_CLASS: &str = "AccountObjectClass";

pub const ATTR_CN: &str = "cn";
pub const ATTR_SN: &str = "sn";
pub const ATTR_GIVEN_NAME: &str = "givenName";
pub const ATTR_EMPLOYEE_NUMBER: &str = "employeeNumber";
pub const ATTR_LOCALITY: &str = "l";
pub const ATTR_STREET: &str = "street";
pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_MAIL: &str = "mail";

/// Maintained by the resource itself and never exposed to mappings.
pub const ATTR_INTERNAL_ID: &str = "internalId";

/// Account object class definition.
pub fn account_definition(namespace: &str) -> ResourceObjectDefinition {
    let ri = |local: &str| QName::new(namespace, local);

    ResourceObjectDefinition::new(ri(ACCOUNT_OBJECT_CLASS), "inetOrgPerson")
        .with_property(
            PropertyDefinition::new(QName::icfs_uid(), ValueType::String)
                .read_only()
                .with_display_name("Entry UUID"),
        )
        .with_property(
            PropertyDefinition::new(QName::icfs_name(), ValueType::String)
                .required()
                .with_display_name("Distinguished Name"),
        )
        .with_property(PropertyDefinition::new(QName::icfs_password(), ValueType::String).write_only())
        .with_property(PropertyDefinition::new(QName::icfs_enable(), ValueType::Boolean))
        .with_property(PropertyDefinition::new(ri(ATTR_CN), ValueType::String))
        .with_property(PropertyDefinition::new(ri(ATTR_SN), ValueType::String))
        .with_property(PropertyDefinition::new(ri(ATTR_GIVEN_NAME), ValueType::String))
        .with_property(PropertyDefinition::new(ri(ATTR_EMPLOYEE_NUMBER), ValueType::String))
        .with_property(PropertyDefinition::new(ri(ATTR_LOCALITY), ValueType::String))
        .with_property(PropertyDefinition::new(ri(ATTR_STREET), ValueType::String).multi_valued())
        .with_property(PropertyDefinition::new(ri(ATTR_DESCRIPTION), ValueType::String).multi_valued())
        .with_property(PropertyDefinition::new(ri(ATTR_MAIL), ValueType::String))
        .with_property(
            PropertyDefinition::new(ri(ATTR_INTERNAL_ID), ValueType::String)
                .read_only()
                .ignored(),
        )
        .with_identifier(QName::icfs_uid())
        .with_secondary_identifier(QName::icfs_name())
        .with_naming_attribute(QName::icfs_name())
        .as_default_account()
}

/// Full resource schema including capabilities.
pub fn resource_schema(namespace: &str) -> ResourceSchema {
    ResourceSchema::new(namespace)
        .with_object_class(account_definition(namespace))
        .with_capabilities(Capabilities {
            activation: Some(ActivationCapability {
                attribute: QName::icfs_enable(),
            }),
            credentials: Some(CredentialsCapability {
                password_attribute: QName::icfs_password(),
                readable: false,
            }),
            live_sync: true,
            test_connection: true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DUMMY_NAMESPACE;

    #[test]
    fn test_account_identifiers() {
        let definition = account_definition(DUMMY_NAMESPACE);
        assert_eq!(definition.identifiers, vec![QName::icfs_uid()]);
        assert_eq!(definition.naming_attribute, Some(QName::icfs_name()));
        assert!(definition
            .find_property_definition(&QName::new(DUMMY_NAMESPACE, ATTR_STREET))
            .unwrap()
            .is_multi_valued());
    }

    #[test]
    fn test_capabilities() {
        let schema = resource_schema(DUMMY_NAMESPACE);
        assert!(schema.capabilities.live_sync);
        assert_eq!(
            schema.capabilities.activation.as_ref().map(|a| &a.attribute),
            Some(&QName::icfs_enable())
        );
        assert!(schema.default_account_definition().is_some());
    }
}
