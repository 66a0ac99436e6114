//! Task descriptors.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ids::{NodeId, Oid};
use crate::repository::{ObjectType, RepositoryObject};
use crate::result::OperationResult;

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    LiveSync,
    Import,
}

impl TaskCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::LiveSync => "live_sync",
            TaskCategory::Import => "import",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live_sync" => Ok(TaskCategory::LiveSync),
            "import" => Ok(TaskCategory::Import),
            _ => Err(format!("Unknown task category: {s}")),
        }
    }
}

/// Whether a task runs once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRecurrence {
    Single,
    Recurring { interval_secs: u64 },
}

impl TaskRecurrence {
    pub fn is_recurring(&self) -> bool {
        matches!(self, TaskRecurrence::Recurring { .. })
    }

    /// Pause between two runs of a recurring task.
    pub fn interval(&self) -> Option<std::time::Duration> {
        match self {
            TaskRecurrence::Single => None,
            TaskRecurrence::Recurring { interval_secs } => {
                Some(std::time::Duration::from_secs(*interval_secs))
            }
        }
    }
}

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecutionStatus {
    /// Waiting to be claimed by a node.
    Runnable,
    /// Claimed and executing on a node.
    Running,
    /// Held back; never claimed until resumed.
    Suspended,
    /// Finished; never claimed again.
    Closed,
}

impl TaskExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecutionStatus::Runnable => "runnable",
            TaskExecutionStatus::Running => "running",
            TaskExecutionStatus::Suspended => "suspended",
            TaskExecutionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TaskExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "runnable" => Ok(TaskExecutionStatus::Runnable),
            "running" => Ok(TaskExecutionStatus::Running),
            "suspended" => Ok(TaskExecutionStatus::Suspended),
            "closed" => Ok(TaskExecutionStatus::Closed),
            _ => Err(format!("Unknown task execution status: {s}")),
        }
    }
}

/// Exclusivity state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExclusivityStatus {
    Claimed,
    Released,
}

impl TaskExclusivityStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExclusivityStatus::Claimed => "claimed",
            TaskExclusivityStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for TaskExclusivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Time-bounded claim of a task by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLease {
    pub owner: NodeId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TaskLease {
    pub fn new(owner: NodeId, now: DateTime<Utc>, duration: std::time::Duration) -> Self {
        Self {
            owner,
            acquired_at: now,
            expires_at: now + to_chrono(duration),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub(crate) fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::weeks(52))
}

/// A persisted asynchronous job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub oid: Oid,

    pub name: String,

    pub category: TaskCategory,

    pub recurrence: TaskRecurrence,

    /// Resource the task works on.
    pub object_ref: Oid,

    pub execution_status: TaskExecutionStatus,

    pub exclusivity_status: TaskExclusivityStatus,

    #[serde(default)]
    pub lease: Option<TaskLease>,

    /// Items handled over the task's lifetime. Never decreases.
    #[serde(default)]
    pub progress: u64,

    #[serde(default)]
    pub last_run_start_timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_run_finish_timestamp: Option<DateTime<Utc>>,

    /// Earliest start of the next run of a recurring task.
    #[serde(default)]
    pub next_run_start_timestamp: Option<DateTime<Utc>>,

    /// Handler state such as the live sync token.
    #[serde(default)]
    pub extension: BTreeMap<String, Value>,

    /// Result of the last run.
    #[serde(default)]
    pub result: Option<OperationResult>,
}

impl Task {
    pub fn new(name: impl Into<String>, category: TaskCategory, object_ref: Oid) -> Self {
        Self {
            oid: Oid::new(),
            name: name.into(),
            category,
            recurrence: TaskRecurrence::Single,
            object_ref,
            execution_status: TaskExecutionStatus::Runnable,
            exclusivity_status: TaskExclusivityStatus::Released,
            lease: None,
            progress: 0,
            last_run_start_timestamp: None,
            last_run_finish_timestamp: None,
            next_run_start_timestamp: None,
            extension: BTreeMap::new(),
            result: None,
        }
    }

    /// A live sync task polling `resource` every `interval_secs`.
    pub fn live_sync(name: impl Into<String>, resource: Oid, interval_secs: u64) -> Self {
        Self::new(name, TaskCategory::LiveSync, resource).recurring(interval_secs)
    }

    /// A single-run import of all accounts of `resource`.
    pub fn import(name: impl Into<String>, resource: Oid) -> Self {
        Self::new(name, TaskCategory::Import, resource)
    }

    #[must_use]
    pub fn recurring(mut self, interval_secs: u64) -> Self {
        self.recurrence = TaskRecurrence::Recurring { interval_secs };
        self
    }

    /// Whether a node may claim the task at `now`.
    ///
    /// Runnable tasks are claimable once due. A running task whose lease
    /// expired is claimable again: its node is gone.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.execution_status {
            TaskExecutionStatus::Runnable => {
                self.lease_expired(now) && self.next_run_start_timestamp.map_or(true, |t| t <= now)
            }
            TaskExecutionStatus::Running => self.lease_expired(now),
            TaskExecutionStatus::Suspended | TaskExecutionStatus::Closed => false,
        }
    }

    /// True when no lease is held or the held lease ran out.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().map_or(true, |l| l.is_expired(now))
    }

    pub fn is_leased_by(&self, node: &NodeId, now: DateTime<Utc>) -> bool {
        self.exclusivity_status == TaskExclusivityStatus::Claimed
            && self
                .lease
                .as_ref()
                .is_some_and(|l| l.owner == *node && !l.is_expired(now))
    }
}

impl RepositoryObject for Task {
    const OBJECT_TYPE: ObjectType = ObjectType::Task;

    fn oid(&self) -> Oid {
        self.oid
    }
}
