//! Shadow Reconciliation Engine Tests
//!
//! End-to-end provisioning against dummy resources:
//! - Account creation from a user with outbound mappings
//! - Conflict on an account that already exists natively
//! - Per-resource failure isolation
//! - Attribute propagation and cascading focus delete

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use midpoint_connector_dummy::{
    DummyAccount, DummyConnectorBuilder, DummyOperation, DummyResource, DummyResourceRegistry,
    FaultKind, DUMMY_CONNECTOR_TYPE,
};
use midpoint_provisioning::error::RepoResult;
use midpoint_provisioning::prelude::*;
use midpoint_provisioning::repository::StoredObject;
use midpoint_ucf::prelude::*;
use serde_json::Value;

const JACK_DN: &str = "uid=jack,ou=people,dc=example,dc=com";

// =============================================================================
// Counting repository
// =============================================================================

/// Repository wrapper counting writes, to check that no-op paths stay
/// read-only.
struct CountingRepository {
    inner: InMemoryRepository,
    adds: AtomicUsize,
    modifies: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryRepository::new(),
            adds: AtomicUsize::new(0),
            modifies: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    fn writes(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
            + self.modifies.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for CountingRepository {
    async fn get_object_with_version(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<StoredObject> {
        self.inner.get_object_with_version(object_type, oid).await
    }

    async fn add_object(&self, object_type: ObjectType, oid: Oid, document: Value) -> RepoResult<Oid> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add_object(object_type, oid, document).await
    }

    async fn modify_object(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        self.modifies.fetch_add(1, Ordering::SeqCst);
        self.inner.modify_object(object_type, oid, modifications).await
    }

    async fn modify_object_if_version(
        &self,
        object_type: ObjectType,
        oid: &Oid,
        expected_version: u64,
        modifications: &[ItemModification],
    ) -> RepoResult<u64> {
        self.modifies.fetch_add(1, Ordering::SeqCst);
        self.inner
            .modify_object_if_version(object_type, oid, expected_version, modifications)
            .await
    }

    async fn delete_object(&self, object_type: ObjectType, oid: &Oid) -> RepoResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_object(object_type, oid).await
    }

    async fn list_objects(&self, object_type: ObjectType, query: &ObjectQuery) -> RepoResult<Vec<StoredObject>> {
        self.inner.list_objects(object_type, query).await
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    engine: ReconciliationEngine,
    repository: Arc<CountingRepository>,
    registry: DummyResourceRegistry,
}

async fn fixture() -> Fixture {
    let registry = DummyResourceRegistry::new();
    let factory = Arc::new(ConnectorFactory::new());
    factory
        .register(Arc::new(DummyConnectorBuilder::new(registry.clone())))
        .await;
    let repository = Arc::new(CountingRepository::new());
    let engine = ReconciliationEngine::new(repository.clone(), ResourceManager::new(factory));
    Fixture {
        engine,
        repository,
        registry,
    }
}

impl Fixture {
    /// A dummy resource with LDAP-like outbound mappings.
    async fn resource(&self, instance: &str) -> (Oid, Arc<DummyResource>) {
        let resource = Resource::new(
            instance,
            ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", instance),
        )
        .with_outbound(
            OutboundMapping::property("icfs:__NAME__", "name").with_transform(Transform::Template {
                template: "uid={value},ou=people,dc=example,dc=com".into(),
            }),
        )
        .with_outbound(OutboundMapping::property("cn", "fullName"))
        .with_outbound(OutboundMapping::property("sn", "familyName"))
        .with_outbound(OutboundMapping::new("icfs:__PASSWORD__", MappingSource::Password))
        .with_cached_attribute("cn");
        self.repository.add(&resource).await.unwrap();
        (resource.oid, self.registry.get_or_create(instance).await)
    }

    async fn shadows(&self) -> Vec<Shadow> {
        self.repository.list(&ObjectQuery::all()).await.unwrap()
    }
}

fn jack(resources: &[Oid]) -> User {
    resources.iter().fold(
        User::new("jack")
            .with_property("fullName", ["Jack Sparrow"])
            .with_property("familyName", ["Sparrow"])
            .with_password("deadmentellnotales"),
        |user, oid| user.with_assignment(*oid),
    )
}

// =============================================================================
// Provisioning
// =============================================================================

#[tokio::test]
async fn test_add_focus_creates_linked_account() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("opendj").await;

    let outcome = fx.engine.add_focus(jack(&[resource_oid])).await.unwrap();
    assert!(outcome.result.is_success());

    let account = dummy.account_by_name(JACK_DN).await.expect("account created");
    assert_eq!(account.first("cn"), Some("Jack Sparrow"));
    assert_eq!(account.first("sn"), Some("Sparrow"));
    assert_eq!(account.password.as_deref(), Some("deadmentellnotales"));

    let user: User = fx.repository.get(&outcome.oid).await.unwrap();
    assert_eq!(user.link_refs.len(), 1);
    let shadow: Shadow = fx.repository.get(&user.link_refs[0]).await.unwrap();
    assert_eq!(shadow.state, ShadowLifecycleState::Linked);
    assert_eq!(shadow.owner_ref, Some(user.oid));
    assert_eq!(shadow.name, JACK_DN);
    assert_eq!(shadow.primary_identifier.as_deref(), Some(account.uid.as_str()));
}

#[tokio::test]
async fn test_existing_native_account_is_a_conflict() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("conflict").await;
    dummy
        .add_account(DummyAccount::new(JACK_DN).with("cn", ["Someone Else"]))
        .await
        .unwrap();

    let outcome = fx.engine.add_focus(jack(&[resource_oid])).await.unwrap();

    assert_eq!(outcome.result.status, OperationResultStatus::FatalError);
    let sub = &outcome.result.subresults[0];
    assert_eq!(sub.error_code.as_deref(), Some("OBJECT_ALREADY_EXISTS"));
    assert!(fx.shadows().await.is_empty());
    assert_eq!(dummy.account_count().await, 1);
    let native = dummy.account_by_name(JACK_DN).await.unwrap();
    assert_eq!(native.first("cn"), Some("Someone Else"));
}

#[tokio::test]
async fn test_failure_on_one_resource_does_not_stop_the_other() {
    let fx = fixture().await;
    let (healthy_oid, healthy) = fx.resource("healthy").await;
    let (broken_oid, broken) = fx.resource("broken").await;
    broken.inject_fault(DummyOperation::Add, FaultKind::GenericFramework).await;

    let outcome = fx
        .engine
        .add_focus(jack(&[healthy_oid, broken_oid]))
        .await
        .unwrap();

    assert_eq!(outcome.result.status, OperationResultStatus::PartialError);
    let statuses: Vec<_> = outcome.result.subresults.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![OperationResultStatus::Success, OperationResultStatus::FatalError]
    );
    assert_eq!(healthy.account_count().await, 1);
    assert_eq!(broken.account_count().await, 0);

    let user: User = fx.repository.get(&outcome.oid).await.unwrap();
    assert_eq!(user.link_refs.len(), 1);
    assert_eq!(fx.shadows().await.len(), 1);
}

#[tokio::test]
async fn test_provisioning_twice_keeps_one_account() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("twice").await;
    let outcome = fx.engine.add_focus(jack(&[resource_oid])).await.unwrap();

    let first: User = fx.repository.get(&outcome.oid).await.unwrap();
    let shadow_oid = fx
        .engine
        .provision_account(&outcome.oid, &resource_oid)
        .await
        .unwrap();

    assert_eq!(first.link_refs, vec![shadow_oid]);
    assert_eq!(dummy.account_count().await, 1);
}

// =============================================================================
// Propagation
// =============================================================================

#[tokio::test]
async fn test_modify_focus_propagates_to_every_account() {
    let fx = fixture().await;
    let (first_oid, first) = fx.resource("propagate-a").await;
    let (second_oid, second) = fx.resource("propagate-b").await;
    let outcome = fx.engine.add_focus(jack(&[first_oid, second_oid])).await.unwrap();

    let result = fx
        .engine
        .modify_focus(
            &outcome.oid,
            &[FocusModification::replace("fullName", ["Captain Jack Sparrow"])],
        )
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.subresults.len(), 2);
    for dummy in [first, second] {
        let account = dummy.account_by_name(JACK_DN).await.unwrap();
        assert_eq!(account.first("cn"), Some("Captain Jack Sparrow"));
        assert_eq!(account.first("sn"), Some("Sparrow"));
    }

    let user: User = fx.repository.get(&outcome.oid).await.unwrap();
    for shadow_oid in &user.link_refs {
        let shadow: Shadow = fx.repository.get(shadow_oid).await.unwrap();
        let cached: Vec<String> = shadow
            .attributes
            .iter()
            .filter(|(name, _)| name.local_part() == "cn")
            .flat_map(|(_, values)| values.iter().map(ToString::to_string))
            .collect();
        assert_eq!(cached, vec!["Captain Jack Sparrow".to_string()]);
    }
}

#[tokio::test]
async fn test_offline_resource_is_reported_per_account() {
    let fx = fixture().await;
    let (online_oid, online) = fx.resource("online").await;
    let (offline_oid, offline) = fx.resource("offline").await;
    let outcome = fx.engine.add_focus(jack(&[online_oid, offline_oid])).await.unwrap();
    offline.set_offline(true).await;

    let result = fx
        .engine
        .modify_focus(&outcome.oid, &[FocusModification::replace("familyName", ["Teague"])])
        .await
        .unwrap();

    assert_eq!(result.status, OperationResultStatus::PartialError);
    assert_eq!(result.failures().len(), 1);
    assert_eq!(online.account_by_name(JACK_DN).await.unwrap().first("sn"), Some("Teague"));

    offline.set_offline(false).await;
    assert_eq!(offline.account_by_name(JACK_DN).await.unwrap().first("sn"), Some("Sparrow"));
}

#[tokio::test]
async fn test_get_shadow_without_fetch_does_not_write() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("nofetch").await;
    let outcome = fx.engine.add_focus(jack(&[resource_oid])).await.unwrap();
    let user: User = fx.repository.get(&outcome.oid).await.unwrap();
    dummy.set_offline(true).await;

    let writes = fx.repository.writes();
    let (shadow, object) = fx.engine.get_shadow(&user.link_refs[0], true).await.unwrap();

    assert_eq!(fx.repository.writes(), writes);
    assert_eq!(shadow.name, JACK_DN);
    assert_eq!(object.single_string(&QName::icfs_name()), Some(JACK_DN));
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_focus_removes_all_accounts_and_shadows() {
    let fx = fixture().await;
    let (first_oid, first) = fx.resource("delete-a").await;
    let (second_oid, second) = fx.resource("delete-b").await;
    let outcome = fx.engine.add_focus(jack(&[first_oid, second_oid])).await.unwrap();
    assert_eq!(fx.shadows().await.len(), 2);

    let result = fx.engine.delete_focus(&outcome.oid).await.unwrap();

    assert!(result.is_success());
    assert_eq!(first.account_count().await, 0);
    assert_eq!(second.account_count().await, 0);
    assert!(fx.shadows().await.is_empty());
    let user: Option<User> = fx.repository.find(&outcome.oid).await.unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn test_delete_focus_keeps_user_when_an_account_survives() {
    let fx = fixture().await;
    let (first_oid, first) = fx.resource("survive-a").await;
    let (second_oid, second) = fx.resource("survive-b").await;
    let outcome = fx.engine.add_focus(jack(&[first_oid, second_oid])).await.unwrap();
    second.inject_fault(DummyOperation::Delete, FaultKind::GenericFramework).await;

    let result = fx.engine.delete_focus(&outcome.oid).await.unwrap();

    assert!(result.is_error());
    assert_eq!(first.account_count().await, 0);
    assert_eq!(second.account_count().await, 1);
    let user: User = fx.repository.get(&outcome.oid).await.unwrap();
    assert_eq!(user.link_refs.len(), 1);
    assert_eq!(fx.shadows().await.len(), 1);
}

#[tokio::test]
async fn test_delete_of_natively_removed_account_succeeds() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("gone").await;
    let outcome = fx.engine.add_focus(jack(&[resource_oid])).await.unwrap();
    dummy.delete_account_by_name(JACK_DN).await.unwrap();

    let result = fx.engine.delete_focus(&outcome.oid).await.unwrap();

    assert!(result.is_success());
    assert!(fx.shadows().await.is_empty());
}
