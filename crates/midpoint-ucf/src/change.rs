//! Change polling records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::object::{Identifiers, ResourceObject};
use crate::qname::QName;
use crate::types::ChangeType;

/// Opaque position in a resource's native change log.
///
/// The value is connector-defined; callers persist it as-is and hand it back
/// on the next poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(serde_json::Value);

impl SyncToken {
    /// Wrap a connector-defined token value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Token holding an integer sequence number.
    pub fn sequence(seq: u64) -> Self {
        Self(serde_json::Value::from(seq))
    }

    /// The raw token value.
    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Integer interpretation, for connectors using sequence numbers.
    pub fn as_sequence(&self) -> Option<u64> {
        self.0.as_u64()
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One native change on the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,

    pub object_class: QName,

    /// Identifiers of the affected object.
    pub identifiers: Identifiers,

    /// State of the object after the change. Absent for deletions, and may
    /// be absent when the connector only reports identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_object: Option<ResourceObject>,

    /// Position of this change in the change log.
    pub token: SyncToken,
}

impl Change {
    /// Create a change record.
    pub fn new(
        change_type: ChangeType,
        object_class: QName,
        identifiers: Identifiers,
        token: SyncToken,
    ) -> Self {
        Self {
            change_type,
            object_class,
            identifiers,
            current_object: None,
            token,
        }
    }

    /// Attach the post-change object state.
    #[must_use]
    pub fn with_current_object(mut self, object: ResourceObject) -> Self {
        self.current_object = Some(object);
        self
    }

    /// Whether this change removed the object.
    pub fn is_delete(&self) -> bool {
        self.change_type == ChangeType::Delete
    }
}

/// A consumable sequence of changes returned by one poll.
///
/// The stream cannot be restarted; a new poll needs the token of the last
/// change consumed.
pub struct ChangeStream {
    inner: Box<dyn Iterator<Item = Change> + Send>,
}

impl ChangeStream {
    /// Create a stream over any iterator of changes.
    pub fn new<I>(changes: I) -> Self
    where
        I: IntoIterator<Item = Change>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(changes.into_iter()),
        }
    }

    /// An empty stream.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for ChangeStream {
    type Item = Change;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}
