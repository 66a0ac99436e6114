//! Shadow reconciliation engine.
//!
//! Translates focus changes into connector operations through outbound
//! mappings, applies them and brings shadows in line with the confirmed
//! resource state.

use chrono::Utc;
use midpoint_ucf::object::ResourceObject;
use midpoint_ucf::operation::{deduplicate_adds, Operation};
use midpoint_ucf::resilience::{call_with_timeout, RetryExecutor};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProvisioningError, ProvisioningResult, RepoError, RepoResult, ShadowError};
use crate::focus::{FocusModification, User};
use crate::ids::Oid;
use crate::mapping::OutboundEvaluator;
use crate::repository::{ItemModification, ObjectQuery, ObjectType, Repository, RepositoryCache, RepositoryExt};
use crate::resource::{ResolvedResource, ResourceManager};
use crate::result::OperationResult;
use crate::shadow::{Shadow, ShadowLifecycleState};

/// Outcome of adding a focus.
#[derive(Debug, Clone)]
pub struct FocusOutcome {
    pub oid: Oid,
    pub result: OperationResult,
}

/// Reconciliation engine for focus and shadow operations.
pub struct ReconciliationEngine {
    repository: Arc<dyn Repository>,
    resources: ResourceManager,
}

impl ReconciliationEngine {
    pub fn new(repository: Arc<dyn Repository>, resources: ResourceManager) -> Self {
        Self {
            repository,
            resources,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Store a user and provision an account on every assigned resource.
    ///
    /// The user is kept even when some accounts cannot be created; the
    /// result reports each resource separately.
    #[instrument(skip(self, user), fields(focus = %user.name))]
    pub async fn add_focus(&self, user: User) -> ProvisioningResult<FocusOutcome> {
        self.repository.add(&user).await?;
        let mut result = OperationResult::new("focus.add").with_param("focus", user.oid);
        result.record_success();

        for resource_oid in &user.assignments {
            let sub = result.subresult("account.provision");
            sub.add_param("resource", resource_oid);
            match self.provision_account(&user.oid, resource_oid).await {
                Ok(shadow_oid) => {
                    sub.add_param("shadow", shadow_oid);
                    sub.record_success();
                }
                Err(e) => {
                    warn!(resource = %resource_oid, error = %e, "Account provisioning failed");
                    sub.record_fatal_error(e.error_code(), &e);
                }
            }
        }

        result.compute_status();
        info!(oid = %user.oid, status = %result.status, "Focus added");
        Ok(FocusOutcome {
            oid: user.oid,
            result,
        })
    }

    /// Create the account of a user on a resource and link it.
    ///
    /// Returns the existing shadow when the user already has a live account
    /// there. An `ObjectAlreadyExists` from the connector leaves no shadow
    /// behind and is reported as a conflict.
    #[instrument(skip(self))]
    pub async fn provision_account(&self, user_oid: &Oid, resource_oid: &Oid) -> ProvisioningResult<Oid> {
        let repository = self.repository.as_ref();
        let user: User = repository.get(user_oid).await?;
        if let Some(existing) = self.linked_shadow(&user, resource_oid).await? {
            debug!(shadow = %existing.oid, "Account already provisioned");
            return Ok(existing.oid);
        }
        if let Some(owned) = self.unlinked_owned_shadow(&user, resource_oid).await? {
            warn!(shadow = %owned.oid, "Completing link of an account provisioned earlier");
            add_link_ref(repository, &user.oid, &owned.oid).await?;
            return Ok(owned.oid);
        }

        let resolved = self.resources.resolve(repository, resource_oid).await?;
        let definition = resolved.account_definition()?;
        let evaluator = OutboundEvaluator::new(
            &resolved.resource.schema_handling.outbound,
            definition,
            resolved.namespace(),
        );
        let (account, additional) = evaluator.build_account(&user)?;
        let name = definition
            .naming_attribute
            .as_ref()
            .and_then(|n| account.single_string(n))
            .ok_or(ShadowError::MissingName)?
            .to_string();

        let mut shadow = Shadow::tentative(*resource_oid, definition.type_name.clone(), name);
        repository.add(&shadow).await?;

        let timeout = resolved.handle.settings().operation_timeout();
        let created = {
            let connector = resolved.handle.acquire().await;
            call_with_timeout("add_object", timeout, connector.add_object(&account, &additional)).await
        };
        let identifiers = match created {
            Ok(identifiers) => identifiers,
            Err(e) => {
                if let Err(cleanup) = repository.delete_object(ObjectType::Shadow, &shadow.oid).await {
                    warn!(shadow = %shadow.oid, error = %cleanup, "Failed to remove tentative shadow");
                }
                if e.is_already_exists() {
                    return Err(ProvisioningError::Conflict {
                        resource: *resource_oid,
                        identifier: shadow.name,
                    });
                }
                return Err(e.into());
            }
        };

        // The account exists from here on; the shadow must say so before
        // anything else can fail.
        shadow.confirm(identifiers.clone(), user.oid)?;
        if let Err(e) = repository.update(&shadow).await {
            error!(
                shadow = %shadow.oid,
                resource = %resource_oid,
                identifiers = %identifiers,
                error = %e,
                "Account created but its shadow could not be confirmed"
            );
            return Err(e.into());
        }
        if let Err(e) = add_link_ref(repository, &user.oid, &shadow.oid).await {
            error!(
                shadow = %shadow.oid,
                focus = %user.oid,
                error = %e,
                "Account created but not linked; the next provisioning links it"
            );
            return Err(e.into());
        }

        let confirmed = match self.fetch(&resolved, &shadow).await {
            Ok(object) => object,
            Err(e) => {
                warn!(shadow = %shadow.oid, error = %e, "Fetch after create failed, caching the requested state");
                let mut object = account;
                for property in identifiers.iter() {
                    object.set_property(property.clone());
                }
                object
            }
        };
        if let Err(e) = shadow.refresh(definition, &confirmed, &resolved.cached_attributes()) {
            warn!(shadow = %shadow.oid, error = %e, "Shadow refresh after create failed");
        }
        shadow.last_sync_at = Some(Utc::now());
        if let Err(e) = repository.update(&shadow).await {
            warn!(shadow = %shadow.oid, error = %e, "Caching attributes after create failed");
        }

        info!(
            shadow = %shadow.oid,
            resource = %resolved.resource.name,
            name = %shadow.name,
            "Account provisioned"
        );
        Ok(shadow.oid)
    }

    /// Apply focus modifications and propagate them to linked accounts.
    ///
    /// Each linked shadow gets its own subresult; a failing resource does
    /// not stop propagation to the others.
    #[instrument(skip(self, modifications), fields(count = modifications.len()))]
    pub async fn modify_focus(
        &self,
        user_oid: &Oid,
        modifications: &[FocusModification],
    ) -> ProvisioningResult<OperationResult> {
        let cache = RepositoryCache::new(self.repository.as_ref());
        let items = modifications
            .iter()
            .map(FocusModification::to_item_modification)
            .collect::<RepoResult<Vec<_>>>()?;
        cache.modify_object(ObjectType::User, user_oid, &items).await?;
        let user: User = cache.get(user_oid).await?;

        let mut result = OperationResult::new("focus.modify").with_param("focus", user_oid);
        result.record_success();
        for shadow_oid in &user.link_refs {
            let sub = result.subresult("shadow.modify");
            sub.add_param("shadow", shadow_oid);
            match self.propagate(&cache, &user, shadow_oid, modifications).await {
                Ok(0) => sub.record_not_applicable(),
                Ok(count) => {
                    sub.add_param("operations", count);
                    sub.record_success();
                }
                Err(e) => {
                    warn!(shadow = %shadow_oid, error = %e, "Propagation to account failed");
                    sub.record_fatal_error(e.error_code(), &e);
                }
            }
        }

        result.compute_status();
        Ok(result)
    }

    async fn propagate(
        &self,
        repository: &dyn Repository,
        user: &User,
        shadow_oid: &Oid,
        modifications: &[FocusModification],
    ) -> ProvisioningResult<usize> {
        let mut shadow: Shadow = repository.get(shadow_oid).await?;
        let resolved = self.resources.resolve(repository, &shadow.resource_ref).await?;
        let definition = resolved.account_definition()?;
        let operations = OutboundEvaluator::new(
            &resolved.resource.schema_handling.outbound,
            definition,
            resolved.namespace(),
        )
        .operations_for(user, modifications)?;
        if operations.is_empty() {
            return Ok(0);
        }

        let count = operations.len();
        self.apply_operations(&resolved, &shadow, operations).await?;
        self.refresh_after_modify(repository, &resolved, &mut shadow).await?;
        Ok(count)
    }

    /// Apply operations directly to the account behind a shadow.
    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn modify_shadow(&self, shadow_oid: &Oid, operations: Vec<Operation>) -> ProvisioningResult<Shadow> {
        let repository = self.repository.as_ref();
        let mut shadow: Shadow = repository.get(shadow_oid).await?;
        let resolved = self.resources.resolve(repository, &shadow.resource_ref).await?;
        self.apply_operations(&resolved, &shadow, operations).await?;
        self.refresh_after_modify(repository, &resolved, &mut shadow).await?;
        Ok(shadow)
    }

    /// Send a modify request, retrying transient failures.
    ///
    /// Before each retry the object is fetched again and add values that
    /// already landed are dropped from the request.
    async fn apply_operations(
        &self,
        resolved: &ResolvedResource,
        shadow: &Shadow,
        mut operations: Vec<Operation>,
    ) -> ProvisioningResult<()> {
        let settings = resolved.handle.settings();
        let timeout = settings.operation_timeout();
        let retry_config = settings.retry_config();
        let max_retries = retry_config.max_retries;
        let retry = RetryExecutor::new(retry_config);

        let mut attempt = 0;
        loop {
            let outcome = {
                let connector = resolved.handle.acquire().await;
                call_with_timeout(
                    "modify_object",
                    timeout,
                    connector.modify_object(&shadow.object_class, &shadow.identifiers, &operations),
                )
                .await
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let delay = retry.calculate_delay(attempt);
                    warn!(
                        shadow = %shadow.oid,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Modify failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    match self.fetch(resolved, shadow).await {
                        Ok(current) => operations = deduplicate_adds(&operations, &current),
                        Err(fetch_error) => {
                            debug!(error = %fetch_error, "Could not re-read object before retry");
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn refresh_after_modify(
        &self,
        repository: &dyn Repository,
        resolved: &ResolvedResource,
        shadow: &mut Shadow,
    ) -> ProvisioningResult<()> {
        match self.fetch(resolved, shadow).await {
            Ok(current) => {
                shadow.refresh(resolved.account_definition()?, &current, &resolved.cached_attributes())?;
                shadow.last_sync_at = Some(Utc::now());
                repository.update(shadow).await?;
            }
            Err(e) => {
                warn!(shadow = %shadow.oid, error = %e, "Could not confirm account state after modify");
            }
        }
        Ok(())
    }

    async fn fetch(&self, resolved: &ResolvedResource, shadow: &Shadow) -> ProvisioningResult<ResourceObject> {
        let timeout = resolved.handle.settings().operation_timeout();
        let connector = resolved.handle.acquire().await;
        let object = call_with_timeout(
            "fetch_object",
            timeout,
            connector.fetch_object(&shadow.object_class, &shadow.identifiers),
        )
        .await?;
        Ok(object)
    }

    /// Read a shadow and its account.
    ///
    /// With `no_fetch` only the repository view (identifiers and cached
    /// attributes) is returned. Otherwise the account is fetched and the
    /// cached attributes are refreshed.
    #[instrument(skip(self))]
    pub async fn get_shadow(&self, shadow_oid: &Oid, no_fetch: bool) -> ProvisioningResult<(Shadow, ResourceObject)> {
        let repository = self.repository.as_ref();
        let mut shadow: Shadow = repository.get(shadow_oid).await?;
        if no_fetch {
            let object = shadow.to_resource_object();
            return Ok((shadow, object));
        }

        let resolved = self.resources.resolve(repository, &shadow.resource_ref).await?;
        let object = self.fetch(&resolved, &shadow).await?;
        shadow.refresh(resolved.account_definition()?, &object, &resolved.cached_attributes())?;
        shadow.last_sync_at = Some(Utc::now());
        repository.update(&shadow).await?;
        Ok((shadow, object))
    }

    /// Detach an account from its owner. The account and the shadow record
    /// stay.
    #[instrument(skip(self))]
    pub async fn unlink_shadow(&self, shadow_oid: &Oid) -> ProvisioningResult<()> {
        let repository = self.repository.as_ref();
        let mut shadow: Shadow = repository.get(shadow_oid).await?;
        let owner = shadow.owner_ref;
        shadow.unlink()?;
        repository.update(&shadow).await?;
        if let Some(owner) = owner {
            remove_link_ref(repository, &owner, shadow_oid).await?;
        }
        info!(shadow = %shadow_oid, "Shadow unlinked");
        Ok(())
    }

    /// Delete the account behind a shadow, then the shadow.
    ///
    /// An account already missing on the resource counts as deleted. A
    /// tentative shadow has no account and is only removed.
    #[instrument(skip(self))]
    pub async fn delete_shadow(&self, shadow_oid: &Oid) -> ProvisioningResult<()> {
        let repository = self.repository.as_ref();
        let Some(mut shadow) = repository.find::<Shadow>(shadow_oid).await? else {
            debug!("Shadow already gone");
            return Ok(());
        };

        if shadow.state != ShadowLifecycleState::Tentative {
            let resolved = self.resources.resolve(repository, &shadow.resource_ref).await?;
            let settings = resolved.handle.settings();
            let timeout = settings.operation_timeout();
            let retry = RetryExecutor::new(settings.retry_config());
            let handle = &resolved.handle;
            let object_class = &shadow.object_class;
            let identifiers = &shadow.identifiers;
            let deleted = retry
                .execute(|| async move {
                    let connector = handle.acquire().await;
                    call_with_timeout("delete_object", timeout, connector.delete_object(object_class, identifiers))
                        .await
                })
                .await;
            match deleted {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(shadow = %shadow_oid, "Account already absent on resource");
                }
                Err(e) => return Err(e.into()),
            }
            shadow.transition(ShadowLifecycleState::Deleted)?;
        }

        ignore_not_found(repository.delete_object(ObjectType::Shadow, shadow_oid).await)?;
        if let Some(owner) = shadow.owner_ref {
            ignore_not_found(remove_link_ref(repository, &owner, shadow_oid).await)?;
        }
        info!(shadow = %shadow_oid, name = %shadow.name, "Shadow deleted");
        Ok(())
    }

    /// Delete a user together with all linked accounts.
    ///
    /// When any account cannot be deleted the user is kept so the remaining
    /// links stay visible, and the result reports a partial error.
    #[instrument(skip(self))]
    pub async fn delete_focus(&self, user_oid: &Oid) -> ProvisioningResult<OperationResult> {
        let repository = self.repository.as_ref();
        let user: User = repository.get(user_oid).await?;
        let mut result = OperationResult::new("focus.delete").with_param("focus", user_oid);
        result.record_success();

        for shadow_oid in &user.link_refs {
            let sub = result.subresult("shadow.delete");
            sub.add_param("shadow", shadow_oid);
            match self.delete_shadow(shadow_oid).await {
                Ok(()) => sub.record_success(),
                Err(e) => {
                    warn!(shadow = %shadow_oid, error = %e, "Account deletion failed");
                    sub.record_fatal_error(e.error_code(), &e);
                }
            }
        }
        result.compute_status();

        if result.is_error() {
            warn!(focus = %user.name, "Focus kept because some accounts could not be deleted");
            return Ok(result);
        }

        repository.delete_object(ObjectType::User, user_oid).await?;
        info!(focus = %user.name, accounts = user.link_refs.len(), "Focus deleted");
        Ok(result)
    }

    /// Live shadow of `user` on a resource, if any.
    async fn linked_shadow(&self, user: &User, resource_oid: &Oid) -> RepoResult<Option<Shadow>> {
        for shadow_oid in &user.link_refs {
            if let Some(shadow) = self.repository.find::<Shadow>(shadow_oid).await? {
                if shadow.resource_ref == *resource_oid && shadow.state.is_live() {
                    return Ok(Some(shadow));
                }
            }
        }
        Ok(None)
    }

    /// A live shadow the user owns on the resource but does not link to.
    async fn unlinked_owned_shadow(&self, user: &User, resource_oid: &Oid) -> RepoResult<Option<Shadow>> {
        let query = ObjectQuery::equal("owner_ref", user.oid.to_string())
            .and(ObjectQuery::equal("resource_ref", resource_oid.to_string()));
        let owned: Vec<Shadow> = self.repository.list(&query).await?;
        Ok(owned
            .into_iter()
            .find(|shadow| shadow.state.is_live() && !user.link_refs.contains(&shadow.oid)))
    }
}

pub(crate) async fn add_link_ref(repository: &dyn Repository, user: &Oid, shadow: &Oid) -> RepoResult<u64> {
    repository
        .modify_object(
            ObjectType::User,
            user,
            &[ItemModification::add("link_refs", vec![Value::from(shadow.to_string())])],
        )
        .await
}

pub(crate) async fn remove_link_ref(repository: &dyn Repository, user: &Oid, shadow: &Oid) -> RepoResult<u64> {
    repository
        .modify_object(
            ObjectType::User,
            user,
            &[ItemModification::delete("link_refs", vec![Value::from(shadow.to_string())])],
        )
        .await
}

pub(crate) fn ignore_not_found<T>(outcome: RepoResult<T>) -> RepoResult<()> {
    match outcome {
        Ok(_) | Err(RepoError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}
