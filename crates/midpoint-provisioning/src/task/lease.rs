//! Task claims.
//!
//! A node runs a task only while it holds the task's lease. Every state
//! change goes through a compare-and-set on the task document version, so
//! two nodes racing for the same task cannot both win.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::model::{Task, TaskExclusivityStatus, TaskExecutionStatus, TaskLease};
use crate::error::{RepoError, RepoResult, TaskError, TaskResult};
use crate::ids::{NodeId, Oid};
use crate::repository::{ItemModification, ObjectType, Repository, RepositoryExt};
use crate::result::OperationResult;

/// Attempts of a fenced write before giving up on repeated version
/// conflicts.
const MAX_CAS_ATTEMPTS: usize = 5;

/// How a finished run leaves the task.
#[derive(Debug, Clone, PartialEq)]
pub enum RunCompletion {
    /// Single-run task done.
    Close,
    /// Recurring task waits for its next run.
    Reschedule { next_run: DateTime<Utc> },
    /// Task failed permanently and needs attention.
    Suspend,
}

impl RunCompletion {
    fn execution_status(&self) -> TaskExecutionStatus {
        match self {
            RunCompletion::Close => TaskExecutionStatus::Closed,
            RunCompletion::Reschedule { .. } => TaskExecutionStatus::Runnable,
            RunCompletion::Suspend => TaskExecutionStatus::Suspended,
        }
    }
}

/// Claims, renews and releases task leases for one node.
#[derive(Clone)]
pub struct LeaseManager {
    repository: Arc<dyn Repository>,
    node_id: NodeId,
    lease_duration: Duration,
}

impl LeaseManager {
    pub fn new(repository: Arc<dyn Repository>, node_id: NodeId, lease_duration: Duration) -> Self {
        Self {
            repository,
            node_id,
            lease_duration,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Claim a task for this node.
    ///
    /// Returns the claimed task, or `None` when the task is not claimable or
    /// another node won the race. Losing is not an error.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn try_claim(&self, task_oid: &Oid) -> TaskResult<Option<Task>> {
        let (task, version) = self.repository.get_versioned::<Task>(task_oid).await?;
        let now = Utc::now();
        if !task.is_claimable(now) {
            return Ok(None);
        }

        let lease = TaskLease::new(self.node_id, now, self.lease_duration);
        let modifications = vec![
            ItemModification::replace("execution_status", to_value(TaskExecutionStatus::Running)?),
            ItemModification::replace("exclusivity_status", to_value(TaskExclusivityStatus::Claimed)?),
            ItemModification::replace("lease", to_value(&lease)?),
            ItemModification::replace("last_run_start_timestamp", to_value(now)?),
        ];
        match self
            .repository
            .modify_object_if_version(ObjectType::Task, task_oid, version, &modifications)
            .await
        {
            Ok(_) => {}
            Err(RepoError::VersionConflict { .. }) => {
                debug!(task = %task_oid, "Claim lost to a concurrent update");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(previous) = &task.lease {
            if previous.owner != self.node_id {
                warn!(task = %task_oid, previous_owner = %previous.owner, "Reclaimed task with expired lease");
            }
        }
        info!(task = %task_oid, name = %task.name, "Task claimed");
        let claimed = self.repository.get::<Task>(task_oid).await?;
        Ok(Some(claimed))
    }

    /// Extend the lease. Returns `false` when this node no longer holds it.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn renew(&self, task_oid: &Oid) -> TaskResult<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (task, version) = self.repository.get_versioned::<Task>(task_oid).await?;
            let now = Utc::now();
            let Some(lease) = task.lease.as_ref().filter(|_| task.is_leased_by(&self.node_id, now)) else {
                return Ok(false);
            };

            let renewed = TaskLease {
                owner: self.node_id,
                acquired_at: lease.acquired_at,
                expires_at: TaskLease::new(self.node_id, now, self.lease_duration).expires_at,
            };
            match self
                .repository
                .modify_object_if_version(
                    ObjectType::Task,
                    task_oid,
                    version,
                    &[ItemModification::replace("lease", to_value(&renewed)?)],
                )
                .await
            {
                Ok(_) => {
                    debug!(task = %task_oid, expires_at = %renewed.expires_at, "Lease renewed");
                    return Ok(true);
                }
                Err(RepoError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        warn!(task = %task_oid, "Lease renewal kept conflicting");
        Ok(false)
    }

    /// Write `modifications` only while this node holds the lease.
    pub async fn fenced_modify(&self, task_oid: &Oid, modifications: &[ItemModification]) -> TaskResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (task, version) = self.repository.get_versioned::<Task>(task_oid).await?;
            if !task.is_leased_by(&self.node_id, Utc::now()) {
                return Err(TaskError::LeaseLost { task: *task_oid });
            }
            match self
                .repository
                .modify_object_if_version(ObjectType::Task, task_oid, version, modifications)
                .await
            {
                Ok(_) => return Ok(()),
                Err(RepoError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TaskError::LeaseLost { task: *task_oid })
    }

    /// Record the end of a run: status, finish time and result.
    ///
    /// The lease stays held; call [`LeaseManager::release`] afterwards.
    #[instrument(skip(self, result), fields(node = %self.node_id))]
    pub async fn finish_run(
        &self,
        task_oid: &Oid,
        completion: &RunCompletion,
        result: &OperationResult,
        progress: u64,
    ) -> TaskResult<()> {
        let next_run = match completion {
            RunCompletion::Reschedule { next_run } => Some(*next_run),
            _ => None,
        };
        let modifications = vec![
            ItemModification::replace("execution_status", to_value(completion.execution_status())?),
            ItemModification::replace("last_run_finish_timestamp", to_value(Utc::now())?),
            ItemModification::replace("next_run_start_timestamp", to_value(next_run)?),
            ItemModification::replace("result", to_value(result)?),
            ItemModification::replace("progress", progress),
        ];
        self.fenced_modify(task_oid, &modifications).await?;
        info!(
            task = %task_oid,
            status = %completion.execution_status(),
            result = %result.status,
            "Task run finished"
        );
        Ok(())
    }

    /// Give up the lease. A task still marked running becomes runnable so
    /// another node can pick it up.
    #[instrument(skip(self), fields(node = %self.node_id))]
    pub async fn release(&self, task_oid: &Oid) -> TaskResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (task, version) = self.repository.get_versioned::<Task>(task_oid).await?;
            if !task.lease.as_ref().is_some_and(|l| l.owner == self.node_id) {
                debug!(task = %task_oid, "Lease not held, nothing to release");
                return Ok(());
            }

            let mut modifications = vec![
                ItemModification::replace(
                    "exclusivity_status",
                    to_value(TaskExclusivityStatus::Released)?,
                ),
                ItemModification::replace("lease", Value::Null),
            ];
            if task.execution_status == TaskExecutionStatus::Running {
                modifications.push(ItemModification::replace(
                    "execution_status",
                    to_value(TaskExecutionStatus::Runnable)?,
                ));
            }
            match self
                .repository
                .modify_object_if_version(ObjectType::Task, task_oid, version, &modifications)
                .await
            {
                Ok(_) => {
                    debug!(task = %task_oid, "Lease released");
                    return Ok(());
                }
                Err(RepoError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TaskError::LeaseLost { task: *task_oid })
    }
}

fn to_value<T: serde::Serialize>(value: T) -> RepoResult<Value> {
    Ok(serde_json::to_value(value)?)
}
