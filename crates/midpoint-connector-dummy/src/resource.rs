//! The in-memory "native" resource behind the dummy connector.
//!
//! A [`DummyResource`] plays the role of an external directory: it keeps
//! accounts, assigns identifiers, records every change in a sequential
//! change log and can be told to fail. Tests use the same API to make
//! changes "natively", bypassing the connector.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use midpoint_ucf::error::{ConnectorError, ConnectorResult};
use midpoint_ucf::object::AttributeValue;
use midpoint_ucf::types::ChangeType;

/// One account stored on the dummy resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyAccount {
    /// Immutable identifier assigned by the resource.
    pub uid: String,
    /// Naming attribute, unique ignoring case.
    pub name: String,
    pub enabled: bool,
    pub password: Option<String>,
    /// Attributes keyed by their local name.
    pub attributes: BTreeMap<String, Vec<AttributeValue>>,
}

impl DummyAccount {
    /// Create an enabled account with no attributes. The identifier is
    /// assigned when the account is added to a resource.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: String::new(),
            name: name.into(),
            enabled: true,
            password: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder: set attribute values.
    #[must_use]
    pub fn with<V: Into<AttributeValue>>(
        mut self,
        attribute: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.set(attribute, values.into_iter().map(Into::into).collect());
        self
    }

    /// Replace attribute values; an empty list removes the attribute.
    pub fn set(&mut self, attribute: &str, values: Vec<AttributeValue>) {
        if values.is_empty() {
            self.attributes.remove(attribute);
        } else {
            self.attributes.insert(attribute.to_string(), values);
        }
    }

    pub fn values(&self, attribute: &str) -> &[AttributeValue] {
        self.attributes.get(attribute).map_or(&[], Vec::as_slice)
    }

    /// First value of an attribute as string.
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().and_then(AttributeValue::as_str)
    }
}

/// Resource operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DummyOperation {
    Schema,
    Add,
    Modify,
    Delete,
    Fetch,
    Search,
    CurrentToken,
    FetchChanges,
}

/// Kind of injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Connection dropped; reported as a communication error.
    Communication,
    /// Internal connector failure.
    GenericFramework,
}

impl FaultKind {
    fn to_error(self, operation: DummyOperation) -> ConnectorError {
        match self {
            FaultKind::Communication => {
                ConnectorError::communication(format!("injected connection failure during {operation:?}"))
            }
            FaultKind::GenericFramework => {
                ConnectorError::framework(format!("injected connector fault during {operation:?}"))
            }
        }
    }
}

/// One entry of the native change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sequence: u64,
    pub change_type: ChangeType,
    pub uid: String,
}

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, DummyAccount>,
    log: Vec<LogEntry>,
    last_sequence: u64,
    faults: HashMap<DummyOperation, VecDeque<FaultKind>>,
    offline: bool,
}

impl State {
    fn name_taken(&self, name: &str, except_uid: Option<&str>) -> bool {
        self.accounts
            .values()
            .any(|a| a.name.eq_ignore_ascii_case(name) && Some(a.uid.as_str()) != except_uid)
    }

    fn record(&mut self, change_type: ChangeType, uid: &str) {
        self.last_sequence += 1;
        self.log.push(LogEntry {
            sequence: self.last_sequence,
            change_type,
            uid: uid.to_string(),
        });
    }
}

/// An in-memory directory with a change log.
pub struct DummyResource {
    name: String,
    state: Mutex<State>,
}

impl DummyResource {
    /// Create an empty resource.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make the next call of `operation` fail. Faults queue up per operation.
    pub async fn inject_fault(&self, operation: DummyOperation, kind: FaultKind) {
        self.state
            .lock()
            .await
            .faults
            .entry(operation)
            .or_default()
            .push_back(kind);
    }

    /// While offline every operation fails with a communication error.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Consume a pending fault for `operation`, if any.
    pub async fn check_fault(&self, operation: DummyOperation) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(ConnectorError::communication(format!(
                "resource '{}' is offline",
                self.name
            )));
        }
        if let Some(kind) = state.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            debug!(resource = %self.name, ?operation, ?kind, "Injecting fault");
            return Err(kind.to_error(operation));
        }
        Ok(())
    }

    /// Store a new account and return its assigned identifier.
    pub async fn add_account(&self, mut account: DummyAccount) -> ConnectorResult<String> {
        let mut state = self.state.lock().await;
        if state.name_taken(&account.name, None) {
            return Err(ConnectorError::already_exists(account.name));
        }
        if account.uid.is_empty() {
            account.uid = Uuid::new_v4().to_string();
        } else if state.accounts.contains_key(&account.uid) {
            return Err(ConnectorError::already_exists(account.uid));
        }
        let uid = account.uid.clone();
        state.record(ChangeType::Add, &uid);
        state.accounts.insert(uid.clone(), account);
        Ok(uid)
    }

    /// Change an account atomically. The closure works on a copy; nothing is
    /// stored if it fails.
    pub async fn modify_account<F>(&self, uid: &str, change: F) -> ConnectorResult<()>
    where
        F: FnOnce(&mut DummyAccount) -> ConnectorResult<()>,
    {
        let mut state = self.state.lock().await;
        let mut updated = state
            .accounts
            .get(uid)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found(uid))?;

        change(&mut updated)?;

        if updated.uid != uid {
            return Err(ConnectorError::schema("account identifier is immutable"));
        }
        if state.name_taken(&updated.name, Some(uid)) {
            return Err(ConnectorError::already_exists(updated.name));
        }
        state.record(ChangeType::Modify, uid);
        state.accounts.insert(uid.to_string(), updated);
        Ok(())
    }

    /// Remove an account.
    pub async fn delete_account(&self, uid: &str) -> ConnectorResult<()> {
        let mut state = self.state.lock().await;
        if state.accounts.remove(uid).is_none() {
            return Err(ConnectorError::not_found(uid));
        }
        state.record(ChangeType::Delete, uid);
        Ok(())
    }

    /// Remove an account by name.
    pub async fn delete_account_by_name(&self, name: &str) -> ConnectorResult<()> {
        let uid = self
            .account_by_name(name)
            .await
            .map(|a| a.uid)
            .ok_or_else(|| ConnectorError::not_found(name))?;
        self.delete_account(&uid).await
    }

    pub async fn account_by_uid(&self, uid: &str) -> Option<DummyAccount> {
        self.state.lock().await.accounts.get(uid).cloned()
    }

    /// Look up an account by name, ignoring case.
    pub async fn account_by_name(&self, name: &str) -> Option<DummyAccount> {
        self.state
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// All accounts, ordered by identifier.
    pub async fn accounts(&self) -> Vec<DummyAccount> {
        self.state.lock().await.accounts.values().cloned().collect()
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Sequence number of the latest change log entry (0 when empty).
    pub async fn last_sequence(&self) -> u64 {
        self.state.lock().await.last_sequence
    }

    /// Log entries after `sequence`, each with the account's current state
    /// (absent if it has been deleted since).
    pub async fn changes_since(&self, sequence: u64) -> Vec<(LogEntry, Option<DummyAccount>)> {
        let state = self.state.lock().await;
        state
            .log
            .iter()
            .filter(|entry| entry.sequence > sequence)
            .map(|entry| (entry.clone(), state.accounts.get(&entry.uid).cloned()))
            .collect()
    }
}

impl std::fmt::Debug for DummyResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyResource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Named dummy resources shared between connectors and tests.
#[derive(Debug, Clone, Default)]
pub struct DummyResourceRegistry {
    resources: Arc<RwLock<HashMap<String, Arc<DummyResource>>>>,
}

impl DummyResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the named resource, creating it on first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<DummyResource> {
        if let Some(resource) = self.resources.read().await.get(name) {
            return resource.clone();
        }
        self.resources
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DummyResource::new(name)))
            .clone()
    }

    /// Get the named resource if it exists.
    pub async fn get(&self, name: &str) -> Option<Arc<DummyResource>> {
        self.resources.read().await.get(name).cloned()
    }
}
