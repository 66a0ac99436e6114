//! Connector framework type definitions
//!
//! Small enums and identifiers shared by the connector contract.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a connector implementation (e.g. "dummy", "ldap").
///
/// Connector implementations are pluggable, so the set of types is open and
/// resolved at runtime through the factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorType(String);

impl ConnectorType {
    /// Create a connector type. Names are normalised to lowercase.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectorType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of change an operation applies to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationType {
    /// Add values (not idempotent for multi-valued attributes).
    Add,
    /// Replace all values.
    Replace,
    /// Delete the given values.
    Delete,
}

impl ModificationType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::Add => "add",
            ModificationType::Replace => "replace",
            ModificationType::Delete => "delete",
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModificationType {
    type Err = ParseModificationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "add" => Ok(ModificationType::Add),
            "replace" => Ok(ModificationType::Replace),
            "delete" => Ok(ModificationType::Delete),
            _ => Err(ParseModificationTypeError(s.to_string())),
        }
    }
}

/// Error parsing modification type from string.
#[derive(Debug, Clone)]
pub struct ParseModificationTypeError(String);

impl fmt::Display for ParseModificationTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid modification type '{}', expected one of: add, replace, delete",
            self.0
        )
    }
}

impl std::error::Error for ParseModificationTypeError {}

/// Kind of native change reported by change polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Object was created.
    Add,
    /// Object was modified.
    Modify,
    /// Object was deleted.
    Delete,
}

impl ChangeType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_type_normalised() {
        assert_eq!(ConnectorType::new(" Dummy ").as_str(), "dummy");
        assert_eq!(ConnectorType::from("LDAP"), ConnectorType::new("ldap"));
    }

    #[test]
    fn test_modification_type_roundtrip() {
        for kind in [
            ModificationType::Add,
            ModificationType::Replace,
            ModificationType::Delete,
        ] {
            let parsed: ModificationType = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("merge".parse::<ModificationType>().is_err());
    }

    #[test]
    fn test_change_type_serde() {
        let json = serde_json::to_string(&ChangeType::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
    }
}
