//! Shadow Objects
//!
//! A shadow is the repository-side projection of one account on a
//! resource. It stores the identifiers needed to address the account and
//! the attributes the resource definition marks as cached; everything else
//! is fetched from the resource on demand.

use chrono::{DateTime, Utc};
use midpoint_ucf::object::{AttributeValue, Identifiers, ResourceObject};
use midpoint_ucf::qname::QName;
use midpoint_ucf::schema::ResourceObjectDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::instrument;

use crate::error::{RepoResult, ShadowError, ShadowResult};
use crate::ids::Oid;
use crate::repository::{ObjectQuery, ObjectType, Repository, RepositoryExt, RepositoryObject};

/// Synchronization situation - relationship between a shadow and its
/// focus as last seen by synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSituation {
    /// Shadow is properly linked to a user.
    Linked,

    /// A matching user exists but is not linked yet.
    Unlinked,

    /// No matching user could be found.
    Unmatched,

    /// The account has been deleted on the resource.
    Deleted,

    /// More than one user matches the account; it is left unlinked.
    Disputed,
}

impl SyncSituation {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSituation::Linked => "linked",
            SyncSituation::Unlinked => "unlinked",
            SyncSituation::Unmatched => "unmatched",
            SyncSituation::Deleted => "deleted",
            SyncSituation::Disputed => "disputed",
        }
    }
}

impl fmt::Display for SyncSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncSituation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linked" => Ok(SyncSituation::Linked),
            "unlinked" => Ok(SyncSituation::Unlinked),
            "unmatched" => Ok(SyncSituation::Unmatched),
            "deleted" => Ok(SyncSituation::Deleted),
            "disputed" => Ok(SyncSituation::Disputed),
            _ => Err(format!("Unknown sync situation: {s}")),
        }
    }
}

/// Shadow lifecycle state.
///
/// ```text
/// Tentative ──add ok──► Linked ──unlink──► Unlinked
///                         │  ▲                │
///                         │  └─────link───────┤
///                         └──────delete───────┴──► Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowLifecycleState {
    /// Account requested, not yet confirmed by the resource.
    Tentative,
    /// Confirmed on the resource and owned by a focus.
    Linked,
    /// Confirmed on the resource, not owned.
    Unlinked,
    /// Removed from the resource.
    Deleted,
}

impl ShadowLifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowLifecycleState::Tentative => "tentative",
            ShadowLifecycleState::Linked => "linked",
            ShadowLifecycleState::Unlinked => "unlinked",
            ShadowLifecycleState::Deleted => "deleted",
        }
    }

    /// Whether `next` is reachable from this state in one step.
    #[must_use]
    pub fn can_transition_to(&self, next: ShadowLifecycleState) -> bool {
        use ShadowLifecycleState::*;
        matches!(
            (self, next),
            (Tentative, Linked)
                | (Linked, Unlinked)
                | (Unlinked, Linked)
                | (Linked, Deleted)
                | (Unlinked, Deleted)
        )
    }

    /// Whether the account is known to exist on the resource.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, ShadowLifecycleState::Linked | ShadowLifecycleState::Unlinked)
    }
}

impl fmt::Display for ShadowLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A shadow object representing an account on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shadow {
    pub oid: Oid,

    /// Value of the naming attribute (e.g. the DN), not the identifier.
    pub name: String,

    pub resource_ref: Oid,

    pub object_class: QName,

    /// Primary identifier value, kept flat so it can be queried.
    /// Set once when the resource confirms the account.
    pub primary_identifier: Option<String>,

    #[serde(default)]
    pub identifiers: Identifiers,

    /// Cached attributes only.
    #[serde(default)]
    pub attributes: BTreeMap<QName, Vec<AttributeValue>>,

    pub state: ShadowLifecycleState,

    pub owner_ref: Option<Oid>,

    pub situation: Option<SyncSituation>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Shadow {
    /// A shadow for an account about to be created.
    pub fn tentative(resource_ref: Oid, object_class: QName, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            oid: Oid::new(),
            name: name.into(),
            resource_ref,
            object_class,
            primary_identifier: None,
            identifiers: Identifiers::new(),
            attributes: BTreeMap::new(),
            state: ShadowLifecycleState::Tentative,
            owner_ref: None,
            situation: None,
            created_at: now,
            updated_at: now,
            last_sync_at: None,
        }
    }

    /// A shadow for an account found on the resource.
    pub fn discovered(
        resource_ref: Oid,
        definition: &ResourceObjectDefinition,
        object: &ResourceObject,
        cached: &[QName],
    ) -> ShadowResult<Self> {
        let mut shadow = Self::tentative(resource_ref, object.object_class.clone(), String::new());
        shadow.state = ShadowLifecycleState::Unlinked;
        shadow.situation = Some(SyncSituation::Unmatched);
        shadow.set_identifiers(definition.identifiers_of(object));
        shadow.refresh(definition, object, cached)?;
        Ok(shadow)
    }

    /// Move to `next`, enforcing the lifecycle.
    pub fn transition(&mut self, next: ShadowLifecycleState) -> ShadowResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ShadowError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the identifiers the resource assigned and take ownership.
    pub fn confirm(&mut self, identifiers: Identifiers, owner: Oid) -> ShadowResult<()> {
        self.transition(ShadowLifecycleState::Linked)?;
        self.set_identifiers(identifiers);
        self.owner_ref = Some(owner);
        self.situation = Some(SyncSituation::Linked);
        Ok(())
    }

    /// Attach to a focus.
    pub fn link(&mut self, owner: Oid) -> ShadowResult<()> {
        if self.state != ShadowLifecycleState::Linked {
            self.transition(ShadowLifecycleState::Linked)?;
        }
        self.owner_ref = Some(owner);
        self.situation = Some(SyncSituation::Linked);
        Ok(())
    }

    /// Detach from the focus; the account stays on the resource.
    pub fn unlink(&mut self) -> ShadowResult<()> {
        self.transition(ShadowLifecycleState::Unlinked)?;
        self.owner_ref = None;
        self.situation = Some(SyncSituation::Unlinked);
        Ok(())
    }

    fn set_identifiers(&mut self, identifiers: Identifiers) {
        self.primary_identifier = identifiers.primary_value();
        self.identifiers = identifiers;
    }

    /// Update name, secondary identifiers and cached attributes from a
    /// confirmed resource object. The primary identifier never changes.
    pub fn refresh(
        &mut self,
        definition: &ResourceObjectDefinition,
        object: &ResourceObject,
        cached: &[QName],
    ) -> ShadowResult<()> {
        let incoming = definition.identifiers_of(object);
        if let (Some(expected), Some(actual)) = (&self.primary_identifier, incoming.primary_value()) {
            if *expected != actual {
                return Err(ShadowError::IdentifierMismatch {
                    shadow: self.oid,
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        for secondary in &definition.secondary_identifiers {
            if let Some(property) = object.property(secondary) {
                self.identifiers.push(property);
            }
        }

        let naming = definition
            .naming_attribute
            .as_ref()
            .and_then(|n| object.single_string(n))
            .ok_or(ShadowError::MissingName)?;
        self.name = naming.to_string();

        self.attributes = cached
            .iter()
            .filter(|name| !definition.is_identifier(name))
            .filter_map(|name| {
                let values = object.values(name);
                (!values.is_empty()).then(|| (name.clone(), values.to_vec()))
            })
            .collect();
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Repository view: identifiers plus cached attributes.
    pub fn to_resource_object(&self) -> ResourceObject {
        let mut object = ResourceObject::new(self.object_class.clone());
        for property in self.identifiers.iter() {
            object.set_property(property.clone());
        }
        for (name, values) in &self.attributes {
            object.set(name.clone(), values.clone());
        }
        object
    }
}

impl RepositoryObject for Shadow {
    const OBJECT_TYPE: ObjectType = ObjectType::Shadow;

    fn oid(&self) -> Oid {
        self.oid
    }
}

/// Find the shadow for an account by its primary identifier.
#[instrument(skip(repository))]
pub async fn find_by_primary_identifier(
    repository: &dyn Repository,
    resource_ref: &Oid,
    object_class: &QName,
    primary_identifier: &str,
) -> RepoResult<Option<Shadow>> {
    let query = ObjectQuery::equal("resource_ref", resource_ref.to_string())
        .and(ObjectQuery::equal("object_class", object_class.to_string()))
        .and(ObjectQuery::equal("primary_identifier", primary_identifier));
    let mut found: Vec<Shadow> = repository.list(&query).await?;
    // Several shadows for one account would be a repository defect; prefer the oldest.
    found.sort_by_key(|s| s.created_at);
    Ok(found.into_iter().next())
}

/// Shadows owned by a focus.
pub async fn find_owned_by(repository: &dyn Repository, owner: &Oid) -> RepoResult<Vec<Shadow>> {
    repository
        .list(&ObjectQuery::equal("owner_ref", owner.to_string()))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use midpoint_ucf::object::Property;
    use midpoint_ucf::schema::{PropertyDefinition, ValueType};

    const NS: &str = "http://example.com/resource";

    fn ri(local: &str) -> QName {
        QName::new(NS, local)
    }

    fn definition() -> ResourceObjectDefinition {
        ResourceObjectDefinition::new(ri("AccountObjectClass"), "__ACCOUNT__")
            .with_property(PropertyDefinition::new(QName::icfs_uid(), ValueType::String).read_only())
            .with_property(PropertyDefinition::new(QName::icfs_name(), ValueType::String).required())
            .with_property(PropertyDefinition::new(ri("l"), ValueType::String))
            .with_property(PropertyDefinition::new(ri("sn"), ValueType::String))
            .with_identifier(QName::icfs_uid())
            .with_secondary_identifier(QName::icfs_name())
            .with_naming_attribute(QName::icfs_name())
    }

    fn account(uid: &str, name: &str) -> ResourceObject {
        ResourceObject::new(ri("AccountObjectClass"))
            .with_value(QName::icfs_uid(), uid)
            .with_value(QName::icfs_name(), name)
            .with_value(ri("l"), "Caribbean")
            .with_value(ri("sn"), "Sparrow")
    }

    #[test]
    fn test_lifecycle_transitions() {
        use ShadowLifecycleState::*;
        assert!(Tentative.can_transition_to(Linked));
        assert!(Linked.can_transition_to(Unlinked));
        assert!(Unlinked.can_transition_to(Deleted));
        assert!(!Tentative.can_transition_to(Unlinked));
        assert!(!Deleted.can_transition_to(Linked));
        assert!(!Linked.can_transition_to(Tentative));
    }

    #[test]
    fn test_confirm_then_unlink() {
        let owner = Oid::new();
        let mut shadow = Shadow::tentative(Oid::new(), ri("AccountObjectClass"), "jack");
        shadow
            .confirm(
                Identifiers::uid("42").with(Property::single(QName::icfs_name(), "jack")),
                owner,
            )
            .unwrap();
        assert_eq!(shadow.state, ShadowLifecycleState::Linked);
        assert_eq!(shadow.primary_identifier.as_deref(), Some("42"));
        assert_eq!(shadow.owner_ref, Some(owner));

        shadow.unlink().unwrap();
        assert_eq!(shadow.state, ShadowLifecycleState::Unlinked);
        assert!(shadow.owner_ref.is_none());

        let mut fresh = Shadow::tentative(Oid::new(), ri("AccountObjectClass"), "will");
        let err = fresh.unlink().unwrap_err();
        assert!(matches!(err, ShadowError::InvalidTransition { .. }));
        assert_eq!(fresh.state, ShadowLifecycleState::Tentative);
    }

    #[test]
    fn test_discovered_keeps_only_cached_attributes() {
        let shadow = Shadow::discovered(
            Oid::new(),
            &definition(),
            &account("42", "uid=jack,dc=example,dc=com"),
            &[ri("l")],
        )
        .unwrap();
        assert_eq!(shadow.name, "uid=jack,dc=example,dc=com");
        assert_eq!(shadow.state, ShadowLifecycleState::Unlinked);
        assert_eq!(shadow.situation, Some(SyncSituation::Unmatched));
        assert_eq!(shadow.attributes.len(), 1);
        assert!(shadow.attributes.contains_key(&ri("l")));

        let view = shadow.to_resource_object();
        assert_eq!(view.single_string(&QName::icfs_uid()), Some("42"));
        assert!(!view.has(&ri("sn")));
    }

    #[test]
    fn test_refresh_tracks_rename_but_not_identifier_change() {
        let def = definition();
        let mut shadow =
            Shadow::discovered(Oid::new(), &def, &account("42", "jack"), &[]).unwrap();

        shadow
            .refresh(&def, &account("42", "jack.sparrow"), &[])
            .unwrap();
        assert_eq!(shadow.name, "jack.sparrow");
        assert_eq!(
            shadow
                .identifiers
                .find(&QName::icfs_name())
                .and_then(Property::first_str),
            Some("jack.sparrow")
        );

        let err = shadow.refresh(&def, &account("99", "jack"), &[]).unwrap_err();
        assert!(matches!(err, ShadowError::IdentifierMismatch { .. }));
    }

    #[test]
    fn test_serialized_shadow_is_queryable() {
        let shadow = Shadow::discovered(Oid::new(), &definition(), &account("42", "jack"), &[])
            .unwrap();
        let doc = serde_json::to_value(&shadow).unwrap();
        let query = ObjectQuery::equal("primary_identifier", "42")
            .and(ObjectQuery::equal("object_class", ri("AccountObjectClass").to_string()));
        assert!(query.matches(&doc));
    }
}
