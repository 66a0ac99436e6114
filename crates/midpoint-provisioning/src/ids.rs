//! Strongly Typed Identifiers
//!
//! Object identifiers (OIDs) address every persisted object; node
//! identifiers name the runtime instance holding a task lease. Both are
//! UUID newtypes so one cannot be passed where the other is expected.
//!
//! # Example
//!
//! ```
//! use midpoint_provisioning::{NodeId, Oid};
//!
//! let oid = Oid::new();
//! let parsed: Oid = oid.to_string().parse().unwrap();
//! assert_eq!(oid, parsed);
//!
//! let node = NodeId::new();
//! assert_ne!(node.to_string(), oid.to_string());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parses the canonical hyphenated form.
            pub fn parse(s: &str) -> Result<Self, ParseIdError> {
                s.parse()
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }
    };
}

define_id!(
    /// Object identifier of a repository object (user, shadow, resource,
    /// task).
    Oid
);

define_id!(
    /// Identifier of one task runtime node.
    ///
    /// Written into task leases; a node only renews or releases leases that
    /// carry its own id.
    NodeId
);
