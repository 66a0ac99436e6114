//! Attribute mappings between users and resource accounts.
//!
//! Outbound mappings compute account attributes from a user; inbound
//! mappings compute user properties from an account. Both may pass values
//! through a [`Transform`].

use midpoint_ucf::object::{AttributeValue, ResourceObject};
use midpoint_ucf::operation::Operation;
use midpoint_ucf::qname::QName;
use midpoint_ucf::schema::{ResourceObjectDefinition, ValueType};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::focus::{FocusModification, User};

/// Prefix addressing framework attributes such as `icfs:__NAME__`.
pub const ICFS_PREFIX: &str = "icfs:";

fn default_true() -> bool {
    true
}

/// Resolve an attribute reference used in a mapping.
///
/// `icfs:__NAME__` names a framework attribute, `{ns}local` is taken
/// verbatim, anything else is local to the resource namespace.
pub fn resolve_attribute(namespace: &str, reference: &str) -> QName {
    if let Some(local) = reference.strip_prefix(ICFS_PREFIX) {
        return QName::icfs(local);
    }
    if reference.starts_with('{') {
        if let Ok(name) = reference.parse() {
            return name;
        }
    }
    QName::new(namespace, reference)
}

/// A regular expression compiled when the mapping is built or loaded.
///
/// Serialized as the pattern text; an invalid pattern fails
/// deserialization.
#[derive(Debug, Clone)]
pub struct RegexPattern(Regex);

impl RegexPattern {
    pub fn new(pattern: &str) -> MappingResult<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| MappingError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn replace_all(&self, value: &str, replacement: &str) -> String {
        self.0.replace_all(value, replacement).into_owned()
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RegexPattern {}

impl FromStr for RegexPattern {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for RegexPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegexPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Value transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Lowercase,
    Uppercase,
    Trim,
    /// Literal substring replacement.
    Replace { from: String, to: String },
    /// Regex replacement; `$1` style group references are expanded.
    Regex { pattern: RegexPattern, replacement: String },
    /// Table lookup, falling back to `default` when given.
    Lookup {
        table: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },
    /// `{value}` in the template is replaced by the input.
    Template { template: String },
    /// Apply transforms in order.
    Chain { steps: Vec<Transform> },
}

impl Transform {
    pub fn apply(&self, value: &str) -> MappingResult<String> {
        Ok(match self {
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
            Transform::Trim => value.trim().to_string(),
            Transform::Replace { from, to } => value.replace(from.as_str(), to),
            Transform::Regex {
                pattern,
                replacement,
            } => pattern.replace_all(value, replacement),
            Transform::Lookup { table, default } => table
                .get(value)
                .or(default.as_ref())
                .cloned()
                .ok_or_else(|| MappingError::LookupMiss {
                    value: value.to_string(),
                })?,
            Transform::Template { template } => template.replace("{value}", value),
            Transform::Chain { steps } => {
                let mut current = value.to_string();
                for step in steps {
                    current = step.apply(&current)?;
                }
                current
            }
        })
    }
}

fn apply_transform(transform: Option<&Transform>, values: Vec<String>) -> MappingResult<Vec<String>> {
    match transform {
        None => Ok(values),
        Some(t) => values.iter().map(|v| t.apply(v)).collect(),
    }
}

/// Where an outbound mapping takes its input from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MappingSource {
    /// A user property (`name` is the user name).
    Property { name: String },
    Constant { value: String },
    /// First value of each part, joined with `separator`; empty parts are
    /// skipped.
    Concat {
        parts: Vec<MappingSource>,
        #[serde(default)]
        separator: String,
    },
    /// The user's password.
    Password,
    /// The user's enabled flag.
    Activation,
}

impl MappingSource {
    fn evaluate(&self, user: &User) -> Vec<String> {
        match self {
            MappingSource::Property { name } => user.property(name),
            MappingSource::Constant { value } => vec![value.clone()],
            MappingSource::Concat { parts, separator } => {
                let joined: Vec<String> = parts
                    .iter()
                    .filter_map(|p| p.evaluate(user).into_iter().next())
                    .filter(|v| !v.is_empty())
                    .collect();
                if joined.is_empty() {
                    Vec::new()
                } else {
                    vec![joined.join(separator)]
                }
            }
            MappingSource::Password => user
                .password
                .iter()
                .map(|p| p.expose().to_string())
                .collect(),
            MappingSource::Activation => vec![user.enabled.to_string()],
        }
    }

    /// Whether this source reads data touched by `modification`.
    pub fn depends_on(&self, modification: &FocusModification) -> bool {
        match (self, modification) {
            (MappingSource::Property { name }, m) => m.affects_property(name),
            (MappingSource::Concat { parts, .. }, m) => parts.iter().any(|p| p.depends_on(m)),
            (MappingSource::Password, FocusModification::Password { .. }) => true,
            (MappingSource::Activation, FocusModification::Activation { .. }) => true,
            _ => false,
        }
    }
}

/// Mapping from user data to one account attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMapping {
    /// Target attribute reference, see [`resolve_attribute`].
    /// Ignored for password and activation sources.
    #[serde(default)]
    pub target: String,

    pub source: MappingSource,

    #[serde(default)]
    pub transform: Option<Transform>,

    /// Apply when the account is created.
    #[serde(default = "default_true")]
    pub on_create: bool,

    /// Apply when the user changes.
    #[serde(default = "default_true")]
    pub on_update: bool,
}

impl OutboundMapping {
    pub fn new(target: impl Into<String>, source: MappingSource) -> Self {
        Self {
            target: target.into(),
            source,
            transform: None,
            on_create: true,
            on_update: true,
        }
    }

    /// Map a user property to an attribute of the same meaning.
    pub fn property(target: impl Into<String>, property: impl Into<String>) -> Self {
        Self::new(target, MappingSource::Property { name: property.into() })
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Only apply on create (initial value).
    #[must_use]
    pub fn create_only(mut self) -> Self {
        self.on_update = false;
        self
    }
}

/// Mapping from an account attribute to a user property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMapping {
    /// Source attribute reference, see [`resolve_attribute`].
    pub source: String,
    /// Target user property; `name` sets the user name.
    pub target: String,
    #[serde(default)]
    pub transform: Option<Transform>,
}

impl InboundMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transform: None,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Mapping evaluation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingPhase {
    Create,
    Update,
}

/// Evaluates outbound mappings against one object class.
pub struct OutboundEvaluator<'a> {
    mappings: &'a [OutboundMapping],
    definition: &'a ResourceObjectDefinition,
    namespace: &'a str,
}

impl<'a> OutboundEvaluator<'a> {
    pub fn new(
        mappings: &'a [OutboundMapping],
        definition: &'a ResourceObjectDefinition,
        namespace: &'a str,
    ) -> Self {
        Self {
            mappings,
            definition,
            namespace,
        }
    }

    /// Build the account to create for `user`.
    ///
    /// Password and activation become additional operations. Fails with
    /// `MissingName` when no mapping sets the naming attribute.
    pub fn build_account(&self, user: &User) -> MappingResult<(ResourceObject, Vec<Operation>)> {
        let mut object = self.definition.instantiate();
        let mut additional = Vec::new();
        for mapping in self.mappings.iter().filter(|m| m.on_create) {
            if let Some(operation) = self.evaluate(mapping, user, MappingPhase::Create)? {
                match operation {
                    Operation::Attribute(m) => {
                        if !m.property.is_empty() {
                            object.set_property(m.property);
                        }
                    }
                    other => additional.push(other),
                }
            }
        }

        if let Some(naming) = &self.definition.naming_attribute {
            if !object.has(naming) {
                return Err(MappingError::MissingName {
                    attribute: naming.to_string(),
                });
            }
        }
        Ok((object, additional))
    }

    /// Operations propagating `modifications` of `user` (already applied).
    ///
    /// Only mappings whose source depends on a modification are evaluated.
    /// Attribute operations are replaces, sorted by attribute name.
    pub fn operations_for(
        &self,
        user: &User,
        modifications: &[FocusModification],
    ) -> MappingResult<Vec<Operation>> {
        let mut attributes = Vec::new();
        let mut others = Vec::new();
        for mapping in self.mappings.iter().filter(|m| m.on_update) {
            if !modifications.iter().any(|m| mapping.source.depends_on(m)) {
                continue;
            }
            match self.evaluate(mapping, user, MappingPhase::Update)? {
                Some(op @ Operation::Attribute(_)) => attributes.push(op),
                Some(op) => others.push(op),
                None => {}
            }
        }
        attributes.sort_by(|a, b| a.attribute_name().cmp(&b.attribute_name()));
        attributes.extend(others);
        Ok(attributes)
    }

    fn evaluate(
        &self,
        mapping: &OutboundMapping,
        user: &User,
        phase: MappingPhase,
    ) -> MappingResult<Option<Operation>> {
        let values = apply_transform(mapping.transform.as_ref(), mapping.source.evaluate(user))?;

        match mapping.source {
            MappingSource::Password => {
                return Ok(values.into_iter().next().map(Operation::password));
            }
            MappingSource::Activation => return Ok(Some(Operation::activation(user.enabled))),
            _ => {}
        }

        let name = resolve_attribute(self.namespace, &mapping.target);
        let definition = self
            .definition
            .find_property_definition(&name)
            .ok_or_else(|| MappingError::UnknownAttribute {
                attribute: mapping.target.clone(),
            })?;
        if definition.ignored {
            debug!(attribute = %mapping.target, "Skipping mapping to ignored attribute");
            return Ok(None);
        }
        if phase == MappingPhase::Create && values.is_empty() {
            return Ok(None);
        }

        let converted = values
            .iter()
            .map(|v| convert(&mapping.target, definition.value_type, v))
            .collect::<MappingResult<Vec<AttributeValue>>>()?;
        Ok(Some(Operation::replace(name, converted)))
    }
}

/// Convert a mapped string to the attribute's value type.
fn convert(attribute: &str, value_type: ValueType, value: &str) -> MappingResult<AttributeValue> {
    let invalid = |expected: &'static str| MappingError::InvalidValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected,
    };
    match value_type {
        ValueType::String => Ok(AttributeValue::String(value.to_string())),
        ValueType::Integer => value
            .parse::<i64>()
            .map(AttributeValue::Integer)
            .map_err(|_| invalid("integer")),
        ValueType::Boolean => value
            .parse::<bool>()
            .map(AttributeValue::Boolean)
            .map_err(|_| invalid("boolean")),
        ValueType::Binary => Ok(AttributeValue::Binary(value.as_bytes().to_vec())),
    }
}

/// Compute user properties from an account.
///
/// Returns the values per target property; an empty list means the account
/// holds no value for the source attribute.
pub fn evaluate_inbound(
    mappings: &[InboundMapping],
    object: &ResourceObject,
    namespace: &str,
) -> MappingResult<BTreeMap<String, Vec<String>>> {
    let mut properties = BTreeMap::new();
    for mapping in mappings {
        let name = resolve_attribute(namespace, &mapping.source);
        let values: Vec<String> = object.values(&name).iter().map(ToString::to_string).collect();
        let values = apply_transform(mapping.transform.as_ref(), values)?;
        properties.insert(mapping.target.clone(), values);
    }
    Ok(properties)
}
