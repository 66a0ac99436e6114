//! Item modifications applied to stored documents.

use midpoint_ucf::types::ModificationType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RepoError, RepoResult};

/// Change of one item of a stored document, addressed by a dotted path.
///
/// - `replace` with one value stores it as is; with none it removes the
///   item; with several it stores them as an array.
/// - `add` treats the item as a set: values already present are skipped.
/// - `delete` removes matching values; a scalar item equal to a deleted
///   value is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemModification {
    pub change_type: ModificationType,
    pub path: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl ItemModification {
    /// Replace the item with a single value.
    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            change_type: ModificationType::Replace,
            path: path.into(),
            values: vec![value.into()],
        }
    }

    /// Remove the item.
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            change_type: ModificationType::Replace,
            path: path.into(),
            values: Vec::new(),
        }
    }

    /// Add values to a set-valued item.
    pub fn add(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            change_type: ModificationType::Add,
            path: path.into(),
            values,
        }
    }

    /// Delete values from a set-valued item.
    pub fn delete(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            change_type: ModificationType::Delete,
            path: path.into(),
            values,
        }
    }

    /// Apply to a document in place.
    pub fn apply(&self, document: &mut Value) -> RepoResult<()> {
        let segments: Vec<&str> = self.path.split('.').collect();
        if self.path.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(RepoError::invalid_modification(&self.path, "empty path segment"));
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| RepoError::invalid_modification(&self.path, "empty path"))?;

        let mut container = document;
        for segment in parents {
            let map = as_object(container, &self.path)?;
            container = map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if container.is_null() {
                *container = Value::Object(Map::new());
            }
        }
        let map = as_object(container, &self.path)?;

        match self.change_type {
            ModificationType::Replace => match self.values.as_slice() {
                [] => {
                    map.remove(*last);
                }
                [value] => {
                    map.insert((*last).to_string(), value.clone());
                }
                values => {
                    map.insert((*last).to_string(), Value::Array(values.to_vec()));
                }
            },
            ModificationType::Add => {
                let item = map
                    .entry((*last).to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if item.is_null() {
                    *item = Value::Array(Vec::new());
                }
                let array = item.as_array_mut().ok_or_else(|| {
                    RepoError::invalid_modification(&self.path, "add requires a multi-valued item")
                })?;
                for value in &self.values {
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
            }
            ModificationType::Delete => {
                let remove_item = match map.get_mut(*last) {
                    Some(Value::Array(array)) => {
                        array.retain(|v| !self.values.contains(v));
                        false
                    }
                    Some(scalar) => self.values.contains(scalar),
                    None => false,
                };
                if remove_item {
                    map.remove(*last);
                }
            }
        }
        Ok(())
    }
}

fn as_object<'a>(value: &'a mut Value, path: &str) -> RepoResult<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| RepoError::invalid_modification(path, "path traverses a non-object item"))
}
