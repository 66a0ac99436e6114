//! Task handler contract and run context.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::lease::LeaseManager;
use super::model::{Task, TaskCategory};
use crate::error::{RepoError, TaskResult};
use crate::ids::Oid;
use crate::repository::{ItemModification, Repository, RepositoryExt};
use crate::result::OperationResult;

/// How a handler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunStatus {
    /// The run did all its work.
    Finished,
    /// The stop signal was observed before all work was done.
    Interrupted,
    /// The run failed in a way the next run may not repeat.
    TemporaryError,
    /// The run cannot succeed without intervention.
    PermanentError,
}

/// Outcome of one handler run.
#[derive(Debug, Clone)]
pub struct TaskRunResult {
    pub status: TaskRunStatus,
    pub result: OperationResult,
}

impl TaskRunResult {
    pub fn new(status: TaskRunStatus, result: OperationResult) -> Self {
        Self { status, result }
    }
}

/// Cooperative stop flag shared between the runtime and one worker.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a handler may touch while it runs a task.
pub struct RunContext {
    repository: Arc<dyn Repository>,
    leases: LeaseManager,
    task_oid: Oid,
    stop: StopSignal,
    progress: AtomicU64,
}

impl RunContext {
    pub fn new(repository: Arc<dyn Repository>, leases: LeaseManager, task: &Task, stop: StopSignal) -> Self {
        Self {
            repository,
            leases,
            task_oid: task.oid,
            stop,
            progress: AtomicU64::new(task.progress),
        }
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub fn task_oid(&self) -> Oid {
        self.task_oid
    }

    /// Whether the runtime asked the run to stop. Checked between items,
    /// never during a connector call.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn record_progress(&self, items: u64) {
        self.progress.fetch_add(items, Ordering::SeqCst);
    }

    /// Read a value from the task extension.
    pub async fn load_extension<T: DeserializeOwned>(&self, key: &str) -> TaskResult<Option<T>> {
        let task: Task = self.repository.get(&self.task_oid).await?;
        match task.extension.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(
                serde_json::from_value(value.clone()).map_err(RepoError::from)?,
            )),
        }
    }

    /// Persist an extension value together with the current progress.
    ///
    /// Fails with `LeaseLost` when another node took the task over; the
    /// handler must stop without writing anything else.
    pub async fn checkpoint(&self, key: &str, value: Value) -> TaskResult<()> {
        self.leases
            .fenced_modify(
                &self.task_oid,
                &[
                    ItemModification::replace(format!("extension.{key}"), value),
                    ItemModification::replace("progress", self.progress()),
                ],
            )
            .await
    }

    /// Persist the current progress.
    pub async fn save_progress(&self) -> TaskResult<()> {
        self.leases
            .fenced_modify(
                &self.task_oid,
                &[ItemModification::replace("progress", self.progress())],
            )
            .await
    }
}

/// Executes the work of one task category.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn category(&self) -> TaskCategory;

    /// Run the task once. Errors returned here are infrastructure failures
    /// (lost lease, repository); work failures belong in the result.
    async fn run(&self, task: &Task, context: &RunContext) -> TaskResult<TaskRunResult>;
}
