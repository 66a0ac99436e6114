//! Operations applied to resource objects.
//!
//! A modify request is an unordered set of [`Operation`]s. Connectors must
//! not depend on the order in which they receive them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::object::{AttributeValue, Property, ResourceObject};
use crate::qname::QName;
use crate::types::ModificationType;

/// A secret value that never appears in logs or debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedString(String);

impl ProtectedString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveal the clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProtectedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedString(***)")
    }
}

/// Change of one attribute's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeModification {
    pub change_type: ModificationType,
    pub property: Property,
}

/// Password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChange {
    pub new_password: ProtectedString,
}

/// Enable or disable the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationChange {
    pub enabled: bool,
}

/// One atomic change to a resource object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Attribute(AttributeModification),
    Password(PasswordChange),
    Activation(ActivationChange),
}

impl Operation {
    fn attribute<V: Into<AttributeValue>>(
        change_type: ModificationType,
        name: QName,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Operation::Attribute(AttributeModification {
            change_type,
            property: Property::multi(name, values),
        })
    }

    /// Add values to an attribute.
    pub fn add<V: Into<AttributeValue>>(name: QName, values: impl IntoIterator<Item = V>) -> Self {
        Self::attribute(ModificationType::Add, name, values)
    }

    /// Replace all values of an attribute. No values clears it.
    pub fn replace<V: Into<AttributeValue>>(
        name: QName,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::attribute(ModificationType::Replace, name, values)
    }

    /// Delete values from an attribute.
    pub fn delete<V: Into<AttributeValue>>(
        name: QName,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::attribute(ModificationType::Delete, name, values)
    }

    /// Set a new password.
    pub fn password(new_password: impl Into<String>) -> Self {
        Operation::Password(PasswordChange {
            new_password: ProtectedString::new(new_password),
        })
    }

    /// Enable or disable the account.
    pub fn activation(enabled: bool) -> Self {
        Operation::Activation(ActivationChange { enabled })
    }

    /// Attribute touched by an attribute modification.
    pub fn attribute_name(&self) -> Option<&QName> {
        match self {
            Operation::Attribute(m) => Some(&m.property.name),
            _ => None,
        }
    }

    /// Whether re-applying this operation could change the result.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            Operation::Attribute(AttributeModification {
                change_type: ModificationType::Add,
                ..
            })
        )
    }
}

/// Drop add values that `current` already holds.
///
/// Used before retrying a modify whose first attempt may have been applied:
/// replace and delete are idempotent, but add to a multi-valued attribute
/// would duplicate values.
pub fn deduplicate_adds(operations: &[Operation], current: &ResourceObject) -> Vec<Operation> {
    operations
        .iter()
        .filter_map(|operation| match operation {
            Operation::Attribute(m) if m.change_type == ModificationType::Add => {
                let present = current.values(&m.property.name);
                let remaining: Vec<AttributeValue> = m
                    .property
                    .values
                    .iter()
                    .filter(|v| !present.contains(v))
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    None
                } else {
                    Some(Operation::Attribute(AttributeModification {
                        change_type: ModificationType::Add,
                        property: Property {
                            name: m.property.name.clone(),
                            values: remaining,
                        },
                    }))
                }
            }
            other => Some(other.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ri(local: &str) -> QName {
        QName::new("http://example.com/resource", local)
    }

    #[test]
    fn test_constructors() {
        let op = Operation::add(ri("employeeNumber"), ["123123123"]);
        assert_eq!(op.attribute_name(), Some(&ri("employeeNumber")));
        assert!(!op.is_idempotent());

        assert!(Operation::replace(ri("sn"), ["Smith007"]).is_idempotent());
        assert!(Operation::delete(ri("givenName"), ["John"]).is_idempotent());
        assert!(Operation::activation(false).attribute_name().is_none());
    }

    #[test]
    fn test_password_is_redacted() {
        let op = Operation::password("secret");
        let debug = format!("{op:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_deduplicate_adds() {
        let current = ResourceObject::new(ri("AccountObjectClass"))
            .with(ri("street"), ["Wall Street"]);

        let operations = vec![
            Operation::add(ri("street"), ["Wall Street", "Main Street"]),
            Operation::add(ri("street2"), Vec::<String>::new()),
            Operation::replace(ri("sn"), ["Smith007"]),
        ];

        let deduped = deduplicate_adds(&operations, &current);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0], Operation::add(ri("street"), ["Main Street"]));
        assert_eq!(deduped[1], Operation::replace(ri("sn"), ["Smith007"]));
    }

    #[test]
    fn test_operation_serde_tagged() {
        let json = serde_json::to_value(Operation::activation(true)).unwrap();
        assert_eq!(json["kind"], "activation");
        assert_eq!(json["enabled"], true);
    }
}
