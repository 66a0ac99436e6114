//! Focus objects.
//!
//! A [`User`] is the authoritative identity. It owns zero or more shadows
//! through `link_refs` and declares which resources it should have an
//! account on through `assignments`.

use midpoint_ucf::operation::ProtectedString;
use midpoint_ucf::types::ModificationType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::RepoResult;
use crate::ids::Oid;
use crate::repository::{ItemModification, ObjectType, RepositoryObject};

/// Property name that addresses [`User::name`].
pub const NAME_PROPERTY: &str = "name";

fn default_true() -> bool {
    true
}

/// A user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub oid: Oid,

    /// Unique login name.
    pub name: String,

    /// Multi-valued properties such as `givenName` or `locality`.
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub password: Option<ProtectedString>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Resources the user should have an account on.
    #[serde(default)]
    pub assignments: Vec<Oid>,

    /// Shadows owned by this user.
    #[serde(default)]
    pub link_refs: Vec<Oid>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            oid: Oid::new(),
            name: name.into(),
            properties: BTreeMap::new(),
            password: None,
            enabled: true,
            assignments: Vec::new(),
            link_refs: Vec::new(),
        }
    }

    /// Set a property.
    #[must_use]
    pub fn with_property<V: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.properties
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(ProtectedString::new(password));
        self
    }

    /// Assign an account on a resource.
    #[must_use]
    pub fn with_assignment(mut self, resource_oid: Oid) -> Self {
        self.assignments.push(resource_oid);
        self
    }

    /// Values of a property; `name` resolves to the user's name.
    pub fn property(&self, name: &str) -> Vec<String> {
        if name == NAME_PROPERTY {
            return vec![self.name.clone()];
        }
        self.properties.get(name).cloned().unwrap_or_default()
    }

    pub fn is_linked_to(&self, shadow_oid: &Oid) -> bool {
        self.link_refs.contains(shadow_oid)
    }
}

impl RepositoryObject for User {
    const OBJECT_TYPE: ObjectType = ObjectType::User;

    fn oid(&self) -> Oid {
        self.oid
    }
}

/// One change to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FocusModification {
    Property {
        change_type: ModificationType,
        name: String,
        values: Vec<String>,
    },
    Password {
        value: ProtectedString,
    },
    Activation {
        enabled: bool,
    },
}

impl FocusModification {
    pub fn replace<V: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::property(ModificationType::Replace, name, values)
    }

    pub fn add<V: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::property(ModificationType::Add, name, values)
    }

    pub fn delete<V: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::property(ModificationType::Delete, name, values)
    }

    fn property<V: Into<String>>(
        change_type: ModificationType,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FocusModification::Property {
            change_type,
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn password(value: impl Into<String>) -> Self {
        FocusModification::Password {
            value: ProtectedString::new(value),
        }
    }

    pub fn activation(enabled: bool) -> Self {
        FocusModification::Activation { enabled }
    }

    /// Repository modification storing this change.
    pub fn to_item_modification(&self) -> RepoResult<ItemModification> {
        Ok(match self {
            FocusModification::Property {
                change_type,
                name,
                values,
            } if name == NAME_PROPERTY => {
                let value = match (change_type, values.as_slice()) {
                    (ModificationType::Replace | ModificationType::Add, [value]) => value,
                    _ => {
                        return Err(crate::error::RepoError::invalid_modification(
                            NAME_PROPERTY,
                            "name takes exactly one value and cannot be deleted",
                        ))
                    }
                };
                ItemModification::replace(NAME_PROPERTY, value.clone())
            }
            FocusModification::Property {
                change_type,
                name,
                values,
            } => {
                // Paths are dotted; a dot in the name would address a nested item.
                if name.is_empty() || name.contains('.') {
                    return Err(crate::error::RepoError::invalid_modification(
                        name.as_str(),
                        "property names must be non-empty and cannot contain '.'",
                    ));
                }
                let path = format!("properties.{name}");
                let values: Vec<Value> = values.iter().cloned().map(Value::from).collect();
                match change_type {
                    ModificationType::Replace => ItemModification::replace(path, Value::Array(values)),
                    ModificationType::Add => ItemModification::add(path, values),
                    ModificationType::Delete => ItemModification::delete(path, values),
                }
            }
            FocusModification::Password { value } => {
                ItemModification::replace("password", serde_json::to_value(value)?)
            }
            FocusModification::Activation { enabled } => ItemModification::replace("enabled", *enabled),
        })
    }

    /// Whether an outbound mapping reading `source` must be re-evaluated.
    pub fn affects_property(&self, source: &str) -> bool {
        matches!(self, FocusModification::Property { name, .. } if name == source)
    }
}
