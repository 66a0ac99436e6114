//! Qualified names for object classes and attributes.
//!
//! Rendered in Clark notation (`{namespace}local`) whenever a name crosses a
//! text boundary, which keeps attribute maps serialisable as JSON objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace of the connector framework's well-known attributes.
pub const ICFS_NS: &str = "http://midpoint.evolveum.com/xml/ns/public/connector/icf-1/resource-schema-1.xsd";

/// Local part of the framework-assigned identifier attribute.
pub const ICFS_UID: &str = "__UID__";

/// Local part of the framework naming attribute.
pub const ICFS_NAME: &str = "__NAME__";

/// Local part of the write-only password attribute.
pub const ICFS_PASSWORD: &str = "__PASSWORD__";

/// Local part of the activation attribute.
pub const ICFS_ENABLE: &str = "__ENABLE__";

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    namespace: String,
    local_part: String,
}

impl QName {
    /// Create a qualified name.
    pub fn new(namespace: impl Into<String>, local_part: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_part: local_part.into(),
        }
    }

    /// Create a name in the connector framework namespace.
    pub fn icfs(local_part: impl Into<String>) -> Self {
        Self::new(ICFS_NS, local_part)
    }

    /// The `__UID__` identifier attribute.
    pub fn icfs_uid() -> Self {
        Self::icfs(ICFS_UID)
    }

    /// The `__NAME__` naming attribute.
    pub fn icfs_name() -> Self {
        Self::icfs(ICFS_NAME)
    }

    /// The `__PASSWORD__` attribute.
    pub fn icfs_password() -> Self {
        Self::icfs(ICFS_PASSWORD)
    }

    /// The `__ENABLE__` attribute.
    pub fn icfs_enable() -> Self {
        Self::icfs(ICFS_ENABLE)
    }

    /// Namespace URI (may be empty).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Local part.
    pub fn local_part(&self) -> &str {
        &self.local_part
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local_part)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_part)
        }
    }
}

impl FromStr for QName {
    type Err = ParseQNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix('{') {
            let (namespace, local_part) = rest
                .split_once('}')
                .ok_or_else(|| ParseQNameError(s.to_string()))?;
            if local_part.is_empty() {
                return Err(ParseQNameError(s.to_string()));
            }
            Ok(Self::new(namespace, local_part))
        } else if s.is_empty() {
            Err(ParseQNameError(s.to_string()))
        } else {
            Ok(Self::new("", s))
        }
    }
}

impl TryFrom<String> for QName {
    type Error = ParseQNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QName> for String {
    fn from(name: QName) -> Self {
        name.to_string()
    }
}

/// Error parsing a qualified name.
#[derive(Debug, Clone)]
pub struct ParseQNameError(String);

impl fmt::Display for ParseQNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid qualified name '{}'", self.0)
    }
}

impl std::error::Error for ParseQNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clark_notation() {
        let name = QName::new("http://example.com/ns", "sn");
        assert_eq!(name.to_string(), "{http://example.com/ns}sn");

        let parsed: QName = "{http://example.com/ns}sn".parse().unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_unqualified() {
        let parsed: QName = "givenName".parse().unwrap();
        assert_eq!(parsed.namespace(), "");
        assert_eq!(parsed.local_part(), "givenName");
        assert_eq!(parsed.to_string(), "givenName");
    }

    #[test]
    fn test_invalid_names() {
        assert!("".parse::<QName>().is_err());
        assert!("{http://example.com/ns".parse::<QName>().is_err());
        assert!("{http://example.com/ns}".parse::<QName>().is_err());
    }

    #[test]
    fn test_serde_as_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(QName::icfs_uid(), 1);

        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("__UID__"));

        let back: std::collections::BTreeMap<QName, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&QName::icfs_uid()), Some(&1));
    }
}
