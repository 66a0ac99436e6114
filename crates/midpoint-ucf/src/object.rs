//! Resource objects and their typed attribute values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::qname::QName;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// String value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Boolean(bool),
    /// Binary data.
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Get as string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as bool if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{s}"),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::Binary(b)
    }
}

/// A named attribute with one or more values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: QName,
    pub values: Vec<AttributeValue>,
}

impl Property {
    /// Create an empty property.
    pub fn new(name: QName) -> Self {
        Self {
            name,
            values: Vec::new(),
        }
    }

    /// Create a single-valued property.
    pub fn single(name: QName, value: impl Into<AttributeValue>) -> Self {
        Self {
            name,
            values: vec![value.into()],
        }
    }

    /// Create a property from several values.
    pub fn multi<V: Into<AttributeValue>>(name: QName, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// First value, if any.
    pub fn first(&self) -> Option<&AttributeValue> {
        self.values.first()
    }

    /// First value as string, if it is one.
    pub fn first_str(&self) -> Option<&str> {
        self.first().and_then(AttributeValue::as_str)
    }

    /// Whether any value is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the property holds the given value.
    pub fn contains(&self, value: &AttributeValue) -> bool {
        self.values.contains(value)
    }
}

/// Identifier attributes addressing one object on a resource.
///
/// Primary identifiers (e.g. `__UID__`) come first; secondary identifiers
/// such as the naming attribute may follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifiers(Vec<Property>);

impl Identifiers {
    /// Create an empty identifier set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Identifier set holding only a `__UID__` value.
    pub fn uid(value: impl Into<String>) -> Self {
        Self(vec![Property::single(QName::icfs_uid(), value.into())])
    }

    /// Add an identifier property.
    #[must_use]
    pub fn with(mut self, property: Property) -> Self {
        self.push(property);
        self
    }

    /// Add or replace an identifier property.
    pub fn push(&mut self, property: Property) {
        if let Some(existing) = self.0.iter_mut().find(|p| p.name == property.name) {
            *existing = property;
        } else {
            self.0.push(property);
        }
    }

    /// Find an identifier by name.
    pub fn find(&self, name: &QName) -> Option<&Property> {
        self.0.iter().find(|p| &p.name == name)
    }

    /// The `__UID__` value, if present.
    pub fn uid_value(&self) -> Option<&str> {
        self.find(&QName::icfs_uid()).and_then(Property::first_str)
    }

    /// The first identifier's first value rendered as text.
    pub fn primary_value(&self) -> Option<String> {
        self.0
            .first()
            .and_then(Property::first)
            .map(ToString::to_string)
    }

    /// Iterate over identifier properties.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    /// Whether the set holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of identifier properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Identifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|p| {
                let values: Vec<String> = p.values.iter().map(ToString::to_string).collect();
                format!("{}={}", p.name.local_part(), values.join("|"))
            })
            .collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

impl FromIterator<Property> for Identifiers {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        let mut ids = Identifiers::new();
        for property in iter {
            ids.push(property);
        }
        ids
    }
}

/// In-memory representation of one target-system entity.
///
/// Owned by the operation that built or fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceObject {
    pub object_class: QName,
    #[serde(default)]
    pub attributes: BTreeMap<QName, Vec<AttributeValue>>,
}

impl ResourceObject {
    /// Create an empty object of the given class.
    pub fn new(object_class: QName) -> Self {
        Self {
            object_class,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: set attribute values.
    #[must_use]
    pub fn with<V: Into<AttributeValue>>(
        mut self,
        name: QName,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.set(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: set a single attribute value.
    #[must_use]
    pub fn with_value(mut self, name: QName, value: impl Into<AttributeValue>) -> Self {
        self.set(name, vec![value.into()]);
        self
    }

    /// Replace all values of an attribute. Empty value lists remove it.
    pub fn set(&mut self, name: QName, values: Vec<AttributeValue>) {
        if values.is_empty() {
            self.attributes.remove(&name);
        } else {
            self.attributes.insert(name, values);
        }
    }

    /// Set an attribute from a property.
    pub fn set_property(&mut self, property: Property) {
        self.set(property.name, property.values);
    }

    /// Remove an attribute entirely.
    pub fn remove(&mut self, name: &QName) -> Option<Vec<AttributeValue>> {
        self.attributes.remove(name)
    }

    /// All values of an attribute.
    pub fn values(&self, name: &QName) -> &[AttributeValue] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// Attribute as a property, if present.
    pub fn property(&self, name: &QName) -> Option<Property> {
        self.attributes.get(name).map(|values| Property {
            name: name.clone(),
            values: values.clone(),
        })
    }

    /// First value of an attribute as string.
    pub fn single_string(&self, name: &QName) -> Option<&str> {
        self.values(name).first().and_then(AttributeValue::as_str)
    }

    /// Whether the attribute is present.
    pub fn has(&self, name: &QName) -> bool {
        self.attributes.contains_key(name)
    }

    /// Iterate over all attributes as properties.
    pub fn properties(&self) -> impl Iterator<Item = Property> + '_ {
        self.attributes.iter().map(|(name, values)| Property {
            name: name.clone(),
            values: values.clone(),
        })
    }

    /// Extract the identifier attributes named in `names`, in order.
    pub fn identifiers(&self, names: &[QName]) -> Identifiers {
        names
            .iter()
            .filter_map(|name| self.property(name))
            .collect()
    }
}
