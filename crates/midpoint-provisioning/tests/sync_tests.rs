//! Synchronization Tests
//!
//! Live sync and import against the dummy resource's native change log:
//! - Token initialisation, advancement and holding on failure
//! - Unmatched accounts creating or linking users
//! - Deleted accounts unlinking or deleting the owner
//! - Idempotent reprocessing of the same changes

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use midpoint_connector_dummy::{
    DummyAccount, DummyConnectorBuilder, DummyOperation, DummyResource, DummyResourceRegistry,
    FaultKind, DUMMY_CONNECTOR_TYPE,
};
use midpoint_provisioning::prelude::*;
use midpoint_provisioning::sync::{LiveSynchronizer, ResourceImporter, SYNC_TOKEN_KEY};
use midpoint_provisioning::task::{LeaseManager, RunContext, StopSignal};
use midpoint_ucf::prelude::*;

fn dn(name: &str) -> String {
    format!("uid={name},ou=people,dc=example,dc=com")
}

fn account(name: &str, locality: &str) -> DummyAccount {
    DummyAccount::new(dn(name))
        .with("cn", [format!("{name} (native)")])
        .with("l", [locality.to_string()])
}

fn known_localities() -> Transform {
    Transform::Lookup {
        table: BTreeMap::from([
            ("Caribbean".to_string(), "Caribbean".to_string()),
            ("Tortuga".to_string(), "Tortuga".to_string()),
        ]),
        default: None,
    }
}

fn policy() -> SynchronizationPolicy {
    SynchronizationPolicy {
        inbound: vec![
            InboundMapping::new("icfs:__NAME__", "name").with_transform(Transform::Regex {
                pattern: "^uid=([^,]+),.*$".parse().unwrap(),
                replacement: "$1".into(),
            }),
            InboundMapping::new("l", "locality").with_transform(known_localities()),
        ],
        ..Default::default()
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    repository: Arc<InMemoryRepository>,
    registry: DummyResourceRegistry,
    service: Arc<SynchronizationService>,
}

async fn fixture() -> Fixture {
    let registry = DummyResourceRegistry::new();
    let factory = Arc::new(ConnectorFactory::new());
    factory
        .register(Arc::new(DummyConnectorBuilder::new(registry.clone())))
        .await;
    let repository = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(ReconciliationEngine::new(
        repository.clone(),
        ResourceManager::new(factory),
    ));
    Fixture {
        repository,
        registry,
        service: Arc::new(SynchronizationService::new(engine)),
    }
}

impl Fixture {
    async fn resource(&self, instance: &str, policy: SynchronizationPolicy) -> (Oid, Arc<DummyResource>) {
        let resource = Resource::new(
            instance,
            ConnectorConfiguration::new(DUMMY_CONNECTOR_TYPE).with_property("instance", instance),
        )
        .with_outbound(
            OutboundMapping::property("icfs:__NAME__", "name").with_transform(Transform::Template {
                template: "uid={value},ou=people,dc=example,dc=com".into(),
            }),
        )
        .with_outbound(OutboundMapping::property("l", "locality"))
        .with_synchronization(policy);
        self.repository.add(&resource).await.unwrap();
        (resource.oid, self.registry.get_or_create(instance).await)
    }

    /// A claimed live sync task and the context a handler would get.
    async fn context(&self, resource_oid: Oid) -> RunContext {
        let task = Task::live_sync("live sync", resource_oid, 60);
        self.repository.add(&task).await.unwrap();
        let leases = LeaseManager::new(self.repository.clone(), NodeId::new(), Duration::from_secs(30));
        let task = leases.try_claim(&task.oid).await.unwrap().unwrap();
        RunContext::new(self.repository.clone(), leases, &task, StopSignal::new())
    }

    fn synchronizer(&self) -> LiveSynchronizer {
        LiveSynchronizer::new(self.service.clone(), LiveSyncConfig::default())
    }

    async fn users(&self) -> Vec<User> {
        self.repository.list(&ObjectQuery::all()).await.unwrap()
    }

    async fn user(&self, name: &str) -> Option<User> {
        self.repository
            .list::<User>(&ObjectQuery::equal("name", name))
            .await
            .unwrap()
            .into_iter()
            .next()
    }

    async fn shadows(&self) -> Vec<Shadow> {
        self.repository.list(&ObjectQuery::all()).await.unwrap()
    }
}

// =============================================================================
// Live sync
// =============================================================================

#[tokio::test]
async fn test_first_cycle_only_records_current_token() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("token-init", policy()).await;
    dummy.add_account(account("barbossa", "Caribbean")).await.unwrap();
    let context = fx.context(resource_oid).await;

    let report = fx.synchronizer().run_cycle(&resource_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.token, Some(SyncToken::sequence(1)));
    assert_eq!(report.statistics.fetched, 0);
    assert!(fx.users().await.is_empty());
    let stored: Option<SyncToken> = context.load_extension(SYNC_TOKEN_KEY).await.unwrap();
    assert_eq!(stored, Some(SyncToken::sequence(1)));
}

#[tokio::test]
async fn test_new_account_creates_linked_user() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("create-focus", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    let uid = dummy.add_account(account("elaine", "Caribbean")).await.unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.statistics.focus_created, 1);
    assert_eq!(report.token, Some(SyncToken::sequence(dummy.last_sequence().await)));

    let user = fx.user("elaine").await.expect("user created");
    assert_eq!(user.property("locality"), vec!["Caribbean".to_string()]);
    assert_eq!(user.link_refs.len(), 1);
    let shadow: Shadow = fx.repository.get(&user.link_refs[0]).await.unwrap();
    assert_eq!(shadow.owner_ref, Some(user.oid));
    assert_eq!(shadow.primary_identifier, Some(uid));
    assert_eq!(shadow.situation, Some(SyncSituation::Linked));
}

#[tokio::test]
async fn test_account_is_correlated_to_existing_user() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("correlate", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();
    let existing = User::new("gibbs");
    fx.repository.add(&existing).await.unwrap();

    dummy.add_account(account("gibbs", "Tortuga")).await.unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.statistics.linked, 1);
    assert_eq!(fx.users().await.len(), 1);
    let user: User = fx.repository.get(&existing.oid).await.unwrap();
    assert_eq!(user.link_refs.len(), 1);
    assert_eq!(user.property("locality"), vec!["Tortuga".to_string()]);
}

#[tokio::test]
async fn test_account_matching_several_users_is_disputed() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("disputed", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();
    let (first, second) = (User::new("gibbs"), User::new("gibbs"));
    fx.repository.add(&first).await.unwrap();
    fx.repository.add(&second).await.unwrap();

    dummy.add_account(account("gibbs", "Tortuga")).await.unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.result.status, OperationResultStatus::Warning);
    assert_eq!(report.statistics.linked, 0);
    assert_eq!(report.statistics.ignored, 1);
    assert_eq!(report.token, Some(SyncToken::sequence(dummy.last_sequence().await)));

    let shadows = fx.shadows().await;
    assert_eq!(shadows.len(), 1);
    assert_eq!(shadows[0].owner_ref, None);
    assert_eq!(shadows[0].situation, Some(SyncSituation::Disputed));
    for oid in [first.oid, second.oid] {
        let user: User = fx.repository.get(&oid).await.unwrap();
        assert!(user.link_refs.is_empty());
        assert!(user.property("locality").is_empty());
    }
}

#[tokio::test]
async fn test_unmatched_account_can_be_ignored() {
    let fx = fixture().await;
    let ignore = SynchronizationPolicy {
        unmatched: UnmatchedReaction::Ignore,
        ..policy()
    };
    let (resource_oid, dummy) = fx.resource("ignore", ignore).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    dummy.add_account(account("ragetti", "Caribbean")).await.unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.statistics.ignored, 1);
    assert!(fx.users().await.is_empty());
    let shadows = fx.shadows().await;
    assert_eq!(shadows.len(), 1);
    assert_eq!(shadows[0].owner_ref, None);
    assert_eq!(shadows[0].situation, Some(SyncSituation::Unmatched));
}

#[tokio::test]
async fn test_failed_change_holds_token_and_is_retried() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("poison", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    let initial = synchronizer.run_cycle(&resource_oid, &context).await.unwrap().token;

    dummy.add_account(account("pintel", "Caribbean")).await.unwrap();
    let poison = dummy.add_account(account("cotton", "Atlantis")).await.unwrap();
    dummy.add_account(account("marty", "Tortuga")).await.unwrap();
    let first = dummy.last_sequence().await - 2;

    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.result.status, OperationResultStatus::PartialError);
    assert_eq!(report.statistics.processed, 2);
    assert_eq!(report.statistics.failed, 1);
    assert_eq!(report.token, Some(SyncToken::sequence(first)));
    assert_ne!(report.token, initial);
    assert!(fx.user("pintel").await.is_some());
    assert!(fx.user("cotton").await.is_none());
    assert!(fx.user("marty").await.is_some());
    let failures = report.result.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_code.as_deref(), Some("MAPPING_LOOKUP_MISS"));

    dummy
        .modify_account(&poison, |account| {
            account.set("l", vec!["Tortuga".into()]);
            Ok(())
        })
        .await
        .unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.token, Some(SyncToken::sequence(dummy.last_sequence().await)));
    assert!(fx.user("cotton").await.is_some());
    assert_eq!(fx.users().await.len(), 3);
    assert_eq!(fx.shadows().await.len(), 3);
}

#[tokio::test]
async fn test_token_never_moves_backwards() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("monotonic", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    let mut previous = 0;
    for name in ["mullroy", "murtogg", "twigg"] {
        dummy.add_account(account(name, "Caribbean")).await.unwrap();
        let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();
        let current = report.token.and_then(|t| t.as_sequence()).unwrap();
        assert!(current > previous);
        previous = current;
    }

    // Nothing new: the token stays.
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();
    assert_eq!(report.token.and_then(|t| t.as_sequence()), Some(previous));
    assert_eq!(report.statistics.fetched, 0);
}

#[tokio::test]
async fn test_fetch_failure_keeps_token() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("fetch-failure", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    let initial = synchronizer.run_cycle(&resource_oid, &context).await.unwrap().token;
    dummy.add_account(account("norrington", "Caribbean")).await.unwrap();
    dummy.inject_fault(DummyOperation::FetchChanges, FaultKind::Communication).await;

    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.result.status, OperationResultStatus::FatalError);
    let stored: Option<SyncToken> = context.load_extension(SYNC_TOKEN_KEY).await.unwrap();
    assert_eq!(stored, initial);
    assert!(fx.users().await.is_empty());
}

#[tokio::test]
async fn test_stopped_cycle_processes_nothing() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("stopped", policy()).await;
    let task = Task::live_sync("live sync", resource_oid, 60);
    fx.repository.add(&task).await.unwrap();
    let leases = LeaseManager::new(fx.repository.clone(), NodeId::new(), Duration::from_secs(30));
    let task = leases.try_claim(&task.oid).await.unwrap().unwrap();
    let stop = StopSignal::new();
    let context = RunContext::new(fx.repository.clone(), leases, &task, stop.clone());
    let synchronizer = fx.synchronizer();
    let initial = synchronizer.run_cycle(&resource_oid, &context).await.unwrap().token;

    dummy.add_account(account("swann", "Caribbean")).await.unwrap();
    stop.stop();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.token, initial);
    assert!(fx.users().await.is_empty());
}

#[tokio::test]
async fn test_disabled_synchronization_is_not_applicable() {
    let fx = fixture().await;
    let disabled = SynchronizationPolicy {
        enabled: false,
        ..policy()
    };
    let (resource_oid, _dummy) = fx.resource("disabled", disabled).await;
    let context = fx.context(resource_oid).await;

    let report = fx.synchronizer().run_cycle(&resource_oid, &context).await.unwrap();

    assert_eq!(report.result.status, OperationResultStatus::NotApplicable);
    assert_eq!(report.token, None);
}

// =============================================================================
// Deleted accounts
// =============================================================================

#[tokio::test]
async fn test_deleted_account_unlinks_owner() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("unlink", policy()).await;
    let context = fx.context(resource_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();
    dummy.add_account(account("tia", "Caribbean")).await.unwrap();
    synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    dummy.delete_account_by_name(&dn("tia")).await.unwrap();
    let report = synchronizer.run_cycle(&resource_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.statistics.unlinked, 1);
    let user = fx.user("tia").await.expect("owner kept");
    assert!(user.link_refs.is_empty());
    assert!(fx.shadows().await.is_empty());
}

#[tokio::test]
async fn test_deleted_account_cascades_to_owner_and_other_accounts() {
    let fx = fixture().await;
    let delete_focus = SynchronizationPolicy {
        deleted: DeletedReaction::DeleteFocus,
        ..policy()
    };
    let (source_oid, source) = fx.resource("hr", delete_focus).await;
    let (target_oid, target) = fx.resource("ldap", SynchronizationPolicy::default()).await;
    let context = fx.context(source_oid).await;
    let synchronizer = fx.synchronizer();
    synchronizer.run_cycle(&source_oid, &context).await.unwrap();

    let user = User::new("davy")
        .with_property("locality", ["Caribbean"])
        .with_assignment(source_oid)
        .with_assignment(target_oid);
    let outcome = fx.service.engine().add_focus(user).await.unwrap();
    assert!(outcome.result.is_success());
    assert_eq!(fx.shadows().await.len(), 2);

    source.delete_account_by_name(&dn("davy")).await.unwrap();
    let report = synchronizer.run_cycle(&source_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.statistics.focus_deleted, 1);
    assert!(fx.users().await.is_empty());
    assert!(fx.shadows().await.is_empty());
    assert_eq!(source.account_count().await, 0);
    assert_eq!(target.account_count().await, 0);
}

// =============================================================================
// Import
// =============================================================================

#[tokio::test]
async fn test_import_creates_users_and_is_repeatable() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("import", policy()).await;
    for name in ["will", "elizabeth", "jack"] {
        dummy.add_account(account(name, "Tortuga")).await.unwrap();
    }
    let importer = ResourceImporter::new(fx.service.clone());

    let context = fx.context(resource_oid).await;
    let report = importer.import(&resource_oid, &context).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.statistics.fetched, 3);
    assert_eq!(report.statistics.focus_created, 3);
    assert_eq!(context.progress(), 3);
    assert_eq!(fx.users().await.len(), 3);

    let report = importer.import(&resource_oid, &context).await.unwrap();

    assert_eq!(report.statistics.updated, 3);
    assert_eq!(fx.users().await.len(), 3);
    assert_eq!(fx.shadows().await.len(), 3);
}

#[tokio::test]
async fn test_import_isolates_failing_accounts() {
    let fx = fixture().await;
    let (resource_oid, dummy) = fx.resource("import-partial", policy()).await;
    dummy.add_account(account("hector", "Caribbean")).await.unwrap();
    dummy.add_account(account("calypso", "Atlantis")).await.unwrap();
    let context = fx.context(resource_oid).await;

    let report = ResourceImporter::new(fx.service.clone())
        .import(&resource_oid, &context)
        .await
        .unwrap();

    assert_eq!(report.result.status, OperationResultStatus::PartialError);
    assert_eq!(report.statistics.processed, 1);
    assert_eq!(report.statistics.failed, 1);
    assert!(fx.user("hector").await.is_some());
    assert!(fx.user("calypso").await.is_none());
}
