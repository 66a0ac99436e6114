//! Per-change synchronization.
//!
//! Decides the situation of one resource object relative to the
//! repository and reacts to it. Every step starts with an existence check,
//! so processing the same change twice ends in the same state.

use chrono::Utc;
use midpoint_ucf::change::Change;
use midpoint_ucf::error::ConnectorError;
use midpoint_ucf::object::ResourceObject;
use midpoint_ucf::resilience::call_with_timeout;
use midpoint_ucf::schema::ResourceObjectDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProvisioningError, ProvisioningResult, RepoError, RepoResult};
use crate::focus::{FocusModification, User, NAME_PROPERTY};
use crate::ids::Oid;
use crate::mapping::evaluate_inbound;
use crate::reconciliation::{add_link_ref, ignore_not_found, remove_link_ref, ReconciliationEngine};
use crate::repository::{ObjectQuery, ObjectType, Repository, RepositoryExt};
use crate::resource::{DeletedReaction, ResolvedResource, SynchronizationPolicy, UnmatchedReaction};
use crate::result::OperationResult;
use crate::shadow::{find_by_primary_identifier, Shadow, SyncSituation};

/// What synchronization did about a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Linked the account to an existing user.
    Linked,
    /// Created a user for the account and linked it.
    FocusCreated,
    /// Refreshed the shadow and applied inbound values to the owner.
    Updated,
    /// Left the account alone.
    Ignored,
    /// Removed the shadow of a deleted account and the owner's link.
    Unlinked,
    /// Deleted the owner of a deleted account.
    FocusDeleted,
}

impl SyncAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Linked => "linked",
            SyncAction::FocusCreated => "focus_created",
            SyncAction::Updated => "updated",
            SyncAction::Ignored => "ignored",
            SyncAction::Unlinked => "unlinked",
            SyncAction::FocusDeleted => "focus_deleted",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of processing one change.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub situation: SyncSituation,
    pub action: SyncAction,
    pub shadow: Option<Oid>,
    pub focus: Option<Oid>,
    /// Result of a nested operation such as a cascading focus delete.
    pub details: Option<OperationResult>,
    /// Set when the change was handled but needs an operator's attention.
    pub warning: Option<String>,
}

impl SyncOutcome {
    fn new(situation: SyncSituation, action: SyncAction) -> Self {
        Self {
            situation,
            action,
            shadow: None,
            focus: None,
            details: None,
            warning: None,
        }
    }

    fn with_shadow(mut self, shadow: Oid) -> Self {
        self.shadow = Some(shadow);
        self
    }

    fn with_focus(mut self, focus: Oid) -> Self {
        self.focus = Some(focus);
        self
    }

    fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    /// Write the outcome into a per-change result node.
    pub fn record(self, result: &mut OperationResult) {
        result.add_param("situation", self.situation);
        result.add_param("action", self.action);
        if let Some(shadow) = self.shadow {
            result.add_param("shadow", shadow);
        }
        if let Some(focus) = self.focus {
            result.add_param("focus", focus);
        }
        match (self.details, self.warning) {
            (Some(details), _) => {
                result.add_subresult(details);
                result.compute_status();
            }
            (None, Some(warning)) => result.record_warning(warning),
            (None, None) => result.record_success(),
        }
    }
}

/// Applies resource changes to shadows and users.
pub struct SynchronizationService {
    engine: Arc<ReconciliationEngine>,
}

impl SynchronizationService {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    fn repository(&self) -> &dyn Repository {
        self.engine.repository().as_ref()
    }

    /// Process one change reported by the resource.
    #[instrument(
        skip(self, resolved, change),
        fields(resource = %resolved.resource.name, change_type = %change.change_type, token = %change.token)
    )]
    pub async fn process_change(
        &self,
        resolved: &ResolvedResource,
        change: &Change,
    ) -> ProvisioningResult<SyncOutcome> {
        let definition = resolved.account_definition()?;
        let policy = resolved.synchronization();
        let primary = change.identifiers.primary_value().ok_or_else(|| {
            ConnectorError::framework(format!(
                "change without primary identifier: {}",
                change.identifiers
            ))
        })?;
        let existing =
            find_by_primary_identifier(self.repository(), &resolved.oid(), &definition.type_name, &primary)
                .await?;

        if change.is_delete() {
            return self.account_deleted(existing, &policy).await;
        }

        let object = match &change.current_object {
            Some(object) => object.clone(),
            None => {
                let timeout = resolved.handle.settings().operation_timeout();
                let fetched = {
                    let connector = resolved.handle.acquire().await;
                    call_with_timeout(
                        "fetch_object",
                        timeout,
                        connector.fetch_object(&change.object_class, &change.identifiers),
                    )
                    .await
                };
                match fetched {
                    Ok(object) => object,
                    Err(e) if e.is_not_found() => {
                        debug!("Changed object is already gone");
                        return self.account_deleted(existing, &policy).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        self.reconcile_object(resolved, definition, &policy, existing, &object)
            .await
    }

    async fn reconcile_object(
        &self,
        resolved: &ResolvedResource,
        definition: &ResourceObjectDefinition,
        policy: &SynchronizationPolicy,
        existing: Option<Shadow>,
        object: &ResourceObject,
    ) -> ProvisioningResult<SyncOutcome> {
        let repository = self.repository();
        let cached = resolved.cached_attributes();
        let mut shadow = match existing {
            Some(mut shadow) => {
                shadow.refresh(definition, object, &cached)?;
                shadow
            }
            None => {
                let shadow = Shadow::discovered(resolved.oid(), definition, object, &cached)?;
                repository.add(&shadow).await?;
                debug!(shadow = %shadow.oid, name = %shadow.name, "Shadow created for discovered account");
                shadow
            }
        };
        shadow.last_sync_at = Some(Utc::now());
        let inbound = evaluate_inbound(&policy.inbound, object, resolved.namespace())?;

        if let Some(owner) = shadow.owner_ref {
            shadow.situation = Some(SyncSituation::Linked);
            repository.update(&shadow).await?;
            apply_inbound(repository, &owner, &inbound).await?;
            return Ok(SyncOutcome::new(SyncSituation::Linked, SyncAction::Updated)
                .with_shadow(shadow.oid)
                .with_focus(owner));
        }

        let focus_name = inbound
            .get(NAME_PROPERTY)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| shadow.name.clone());
        let candidates: Vec<User> = repository
            .list(&ObjectQuery::equal(NAME_PROPERTY, focus_name.clone()))
            .await?;

        if candidates.len() > 1 {
            warn!(
                shadow = %shadow.oid,
                name = %focus_name,
                candidates = candidates.len(),
                "Account matches several users, left unlinked"
            );
            shadow.situation = Some(SyncSituation::Disputed);
            repository.update(&shadow).await?;
            return Ok(SyncOutcome::new(SyncSituation::Disputed, SyncAction::Ignored)
                .with_shadow(shadow.oid)
                .with_warning(format!("{} users named '{focus_name}' match the account", candidates.len())));
        }
        if let Some(user) = candidates.into_iter().next() {
            shadow.link(user.oid)?;
            repository.update(&shadow).await?;
            if !user.is_linked_to(&shadow.oid) {
                add_link_ref(repository, &user.oid, &shadow.oid).await?;
            }
            apply_inbound(repository, &user.oid, &inbound).await?;
            info!(shadow = %shadow.oid, focus = %user.name, "Account linked to existing user");
            return Ok(SyncOutcome::new(SyncSituation::Unlinked, SyncAction::Linked)
                .with_shadow(shadow.oid)
                .with_focus(user.oid));
        }

        match policy.unmatched {
            UnmatchedReaction::Ignore => {
                shadow.situation = Some(SyncSituation::Unmatched);
                repository.update(&shadow).await?;
                Ok(SyncOutcome::new(SyncSituation::Unmatched, SyncAction::Ignored).with_shadow(shadow.oid))
            }
            UnmatchedReaction::CreateFocus => {
                let mut user = User::new(focus_name);
                for (property, values) in inbound {
                    if property != NAME_PROPERTY && !values.is_empty() {
                        user.properties.insert(property, values);
                    }
                }
                user.link_refs.push(shadow.oid);
                repository.add(&user).await?;
                shadow.link(user.oid)?;
                repository.update(&shadow).await?;
                info!(shadow = %shadow.oid, focus = %user.name, "User created from account");
                Ok(SyncOutcome::new(SyncSituation::Unmatched, SyncAction::FocusCreated)
                    .with_shadow(shadow.oid)
                    .with_focus(user.oid))
            }
        }
    }

    async fn account_deleted(
        &self,
        existing: Option<Shadow>,
        policy: &SynchronizationPolicy,
    ) -> ProvisioningResult<SyncOutcome> {
        let Some(shadow) = existing else {
            return Ok(SyncOutcome::new(SyncSituation::Deleted, SyncAction::Ignored));
        };
        let repository = self.repository();

        match (shadow.owner_ref, policy.deleted) {
            (Some(owner), DeletedReaction::DeleteFocus) => {
                // The cascade sees the account as already absent.
                let details = self.engine.delete_focus(&owner).await?;
                let mut outcome = SyncOutcome::new(SyncSituation::Deleted, SyncAction::FocusDeleted)
                    .with_shadow(shadow.oid)
                    .with_focus(owner);
                outcome.details = Some(details);
                Ok(outcome)
            }
            (owner, _) => {
                ignore_not_found(repository.delete_object(ObjectType::Shadow, &shadow.oid).await)?;
                if let Some(owner) = owner {
                    ignore_not_found(remove_link_ref(repository, &owner, &shadow.oid).await)?;
                }
                info!(shadow = %shadow.oid, name = %shadow.name, "Shadow of deleted account removed");
                let outcome = SyncOutcome::new(SyncSituation::Deleted, SyncAction::Unlinked).with_shadow(shadow.oid);
                Ok(match owner {
                    Some(owner) => outcome.with_focus(owner),
                    None => outcome,
                })
            }
        }
    }
}

/// Replace user properties with inbound values. The name is only
/// changed to a single non-empty value.
async fn apply_inbound(
    repository: &dyn Repository,
    owner: &Oid,
    inbound: &BTreeMap<String, Vec<String>>,
) -> ProvisioningResult<()> {
    let modifications: Vec<FocusModification> = inbound
        .iter()
        .filter(|(property, values)| property.as_str() != NAME_PROPERTY || values.len() == 1)
        .map(|(property, values)| FocusModification::replace(property.clone(), values.clone()))
        .collect();
    if modifications.is_empty() {
        return Ok(());
    }
    let items = modifications
        .iter()
        .map(FocusModification::to_item_modification)
        .collect::<RepoResult<Vec<_>>>()?;
    match repository.modify_object(ObjectType::User, owner, &items).await {
        Ok(_) => Ok(()),
        Err(RepoError::NotFound { .. }) => {
            warn!(focus = %owner, "Owner of linked shadow is missing");
            Ok(())
        }
        Err(e) => Err(ProvisioningError::from(e)),
    }
}
