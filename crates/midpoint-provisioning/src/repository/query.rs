//! Object queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter over stored documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectQuery {
    /// Every document.
    All,
    /// Item at a dotted path equals the value. An array item matches if it
    /// contains the value.
    Equal { path: String, value: Value },
    /// Every sub-query matches.
    And { conditions: Vec<ObjectQuery> },
}

impl ObjectQuery {
    pub fn all() -> Self {
        ObjectQuery::All
    }

    pub fn equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        ObjectQuery::Equal {
            path: path.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn and(self, other: ObjectQuery) -> Self {
        match self {
            ObjectQuery::And { mut conditions } => {
                conditions.push(other);
                ObjectQuery::And { conditions }
            }
            first => ObjectQuery::And {
                conditions: vec![first, other],
            },
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            ObjectQuery::All => true,
            ObjectQuery::Equal { path, value } => {
                match path.split('.').try_fold(document, |item, segment| item.get(segment)) {
                    Some(Value::Array(items)) => items.contains(value),
                    Some(item) => item == value,
                    None => value.is_null(),
                }
            }
            ObjectQuery::And { conditions } => conditions.iter().all(|q| q.matches(document)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_on_nested_and_array_items() {
        let doc = json!({
            "resource_ref": "r1",
            "identifiers": {"uid": "42"},
            "link_refs": ["s1", "s2"]
        });
        assert!(ObjectQuery::equal("resource_ref", "r1").matches(&doc));
        assert!(ObjectQuery::equal("identifiers.uid", "42").matches(&doc));
        assert!(ObjectQuery::equal("link_refs", "s2").matches(&doc));
        assert!(!ObjectQuery::equal("link_refs", "s3").matches(&doc));
        assert!(ObjectQuery::equal("missing", Value::Null).matches(&doc));
    }

    #[test]
    fn test_and_requires_all() {
        let doc = json!({"a": 1, "b": 2});
        let q = ObjectQuery::equal("a", 1).and(ObjectQuery::equal("b", 2));
        assert!(q.matches(&doc));
        let q = q.and(ObjectQuery::equal("c", 3));
        assert!(!q.matches(&doc));
        assert!(ObjectQuery::all().matches(&doc));
    }
}
