//! Task Runtime
//!
//! Scans the repository for due tasks, claims them through the lease
//! protocol and runs each claimed task on its own spawned worker. A
//! heartbeat keeps the leases of running workers alive; a worker whose
//! lease cannot be renewed is told to stop.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::handler::{RunContext, StopSignal, TaskHandler, TaskRunResult, TaskRunStatus};
use super::lease::{LeaseManager, RunCompletion};
use super::model::{to_chrono, Task, TaskCategory, TaskExecutionStatus};
use crate::error::{RepoError, TaskError, TaskResult};
use crate::ids::{NodeId, Oid};
use crate::repository::{ItemModification, ObjectQuery, ObjectType, Repository, RepositoryExt};
use crate::result::OperationResult;

/// Granularity of stop checks while a recurring task waits for its next run.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Task runtime configuration.
#[derive(Debug, Clone)]
pub struct TaskRuntimeConfig {
    /// Identity of this node in task leases.
    pub node_id: NodeId,

    /// How often to look for due tasks.
    pub scan_interval: Duration,

    /// Lifetime of a claim without renewal.
    pub lease_duration: Duration,

    /// How often to renew held leases. Must be well below `lease_duration`.
    pub heartbeat_interval: Duration,

    /// Upper bound on waiting for workers to stop on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for TaskRuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(),
            scan_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

struct Worker {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

struct RuntimeInner {
    repository: Arc<dyn Repository>,
    leases: LeaseManager,
    handlers: RwLock<HashMap<TaskCategory, Arc<dyn TaskHandler>>>,
    workers: Mutex<HashMap<Oid, Worker>>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    config: TaskRuntimeConfig,
}

/// Runs claimed tasks on this node.
#[derive(Clone)]
pub struct TaskRuntime {
    inner: Arc<RuntimeInner>,
}

impl TaskRuntime {
    pub fn new(repository: Arc<dyn Repository>, config: TaskRuntimeConfig) -> Self {
        let leases = LeaseManager::new(repository.clone(), config.node_id, config.lease_duration);
        Self {
            inner: Arc::new(RuntimeInner {
                repository,
                leases,
                handlers: RwLock::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                config,
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.config.node_id
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.inner.leases
    }

    /// Register the handler for a task category, replacing any previous one.
    pub async fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        let category = handler.category();
        self.inner.handlers.write().await.insert(category, handler);
        debug!(category = %category, "Task handler registered");
    }

    /// Start the scan and heartbeat loop.
    pub fn start(&self) -> JoinHandle<()> {
        let runtime = self.clone();
        tokio::spawn(async move { runtime.run().await })
    }

    #[instrument(skip(self), fields(node = %self.node_id()))]
    async fn run(&self) {
        info!(
            scan_interval_ms = self.inner.config.scan_interval.as_millis() as u64,
            lease_duration_secs = self.inner.config.lease_duration.as_secs(),
            "Starting task runtime"
        );
        let mut scan = interval(self.inner.config.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval(self.inner.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = scan.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "Task scan failed");
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat_once().await;
                }
                _ = self.inner.shutdown_notify.notified() => {}
            }
        }
        info!("Task runtime loop stopped");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Claim every due task that has a handler and no local worker yet.
    ///
    /// Returns the number of workers started.
    pub async fn scan_once(&self) -> TaskResult<usize> {
        self.reap_finished().await;
        if self.is_shutdown() {
            return Ok(0);
        }

        let now = Utc::now();
        let tasks: Vec<Task> = self.inner.repository.list(&ObjectQuery::all()).await?;
        let mut started = 0;
        for task in tasks.into_iter().filter(|t| t.is_claimable(now)) {
            if self.inner.workers.lock().await.contains_key(&task.oid) {
                continue;
            }
            let Some(handler) = self.handler_for(task.category).await else {
                debug!(task = %task.oid, category = %task.category, "No handler, task skipped");
                continue;
            };
            match self.inner.leases.try_claim(&task.oid).await {
                Ok(Some(claimed)) => {
                    self.spawn_worker(claimed, handler).await;
                    started += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(task = %task.oid, error = %e, "Claim failed, task skipped"),
            }
        }
        Ok(started)
    }

    /// Renew the lease of every local worker. Workers whose lease is gone
    /// are stopped.
    pub async fn heartbeat_once(&self) {
        let running: Vec<(Oid, StopSignal)> = self
            .inner
            .workers
            .lock()
            .await
            .iter()
            .filter(|(_, worker)| !worker.handle.is_finished())
            .map(|(oid, worker)| (*oid, worker.stop.clone()))
            .collect();

        for (oid, stop) in running {
            match self.inner.leases.renew(&oid).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(task = %oid, "Lease lost, stopping worker");
                    stop.stop();
                }
                Err(e) => warn!(task = %oid, error = %e, "Lease renewal failed"),
            }
        }
    }

    /// Store a new task. It runs once a scan finds it due.
    pub async fn submit(&self, task: &Task) -> TaskResult<Oid> {
        let oid = self.inner.repository.add(task).await?;
        info!(task = %oid, name = %task.name, category = %task.category, "Task submitted");
        Ok(oid)
    }

    /// Create an import task for a resource and start it right away.
    #[instrument(skip(self), fields(node = %self.node_id()))]
    pub async fn launch_import(&self, resource_oid: &Oid) -> TaskResult<Oid> {
        let handler = self
            .handler_for(TaskCategory::Import)
            .await
            .ok_or_else(|| TaskError::NoHandler {
                category: TaskCategory::Import.to_string(),
            })?;
        if self.is_shutdown() {
            return Err(TaskError::not_runnable(*resource_oid, "runtime is shutting down"));
        }

        let task = Task::import(format!("Import from resource {resource_oid}"), *resource_oid);
        let oid = self.submit(&task).await?;
        match self.inner.leases.try_claim(&oid).await? {
            Some(claimed) => self.spawn_worker(claimed, handler).await,
            None => debug!(task = %oid, "Import claimed elsewhere before start"),
        }
        Ok(oid)
    }

    /// Stop the local worker of a task, if any, and mark the task suspended.
    #[instrument(skip(self), fields(node = %self.node_id()))]
    pub async fn suspend_task(&self, task_oid: &Oid) -> TaskResult<()> {
        let task: Task = self.inner.repository.get(task_oid).await?;
        if task.execution_status == TaskExecutionStatus::Closed {
            return Err(TaskError::not_runnable(*task_oid, "task is closed"));
        }

        let worker = self.inner.workers.lock().await.remove(task_oid);
        if let Some(worker) = worker {
            worker.stop.stop();
            self.await_worker(task_oid, worker.handle, self.inner.config.shutdown_timeout)
                .await;
        }

        self.inner
            .repository
            .modify_object(
                ObjectType::Task,
                task_oid,
                &[ItemModification::replace(
                    "execution_status",
                    serde_json::to_value(TaskExecutionStatus::Suspended).map_err(RepoError::from)?,
                )],
            )
            .await?;
        info!(task = %task_oid, "Task suspended");
        Ok(())
    }

    /// Make a suspended task runnable again.
    pub async fn resume_task(&self, task_oid: &Oid) -> TaskResult<()> {
        let task: Task = self.inner.repository.get(task_oid).await?;
        if task.execution_status != TaskExecutionStatus::Suspended {
            return Err(TaskError::not_runnable(*task_oid, "task is not suspended"));
        }
        self.inner
            .repository
            .modify_object(
                ObjectType::Task,
                task_oid,
                &[ItemModification::replace(
                    "execution_status",
                    serde_json::to_value(TaskExecutionStatus::Runnable).map_err(RepoError::from)?,
                )],
            )
            .await?;
        info!(task = %task_oid, "Task resumed");
        Ok(())
    }

    /// Tasks with a live worker on this node.
    pub async fn running_tasks(&self) -> Vec<Oid> {
        self.inner
            .workers
            .lock()
            .await
            .iter()
            .filter(|(_, worker)| !worker.handle.is_finished())
            .map(|(oid, _)| *oid)
            .collect()
    }

    /// Wait until the local worker of a task is gone. Returns `false` on
    /// timeout.
    pub async fn wait_for_completion(&self, task_oid: &Oid, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let running = self
                .inner
                .workers
                .lock()
                .await
                .get(task_oid)
                .is_some_and(|worker| !worker.handle.is_finished());
            if !running {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(STOP_POLL_INTERVAL.min(timeout)).await;
        }
    }

    /// Signal every local worker to stop, wait for them within the
    /// configured bound and release the leases they still hold.
    #[instrument(skip(self), fields(node = %self.node_id()))]
    pub async fn shutdown(&self) {
        info!("Task runtime shutdown requested");
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_notify.notify_waiters();

        let workers: Vec<(Oid, Worker)> = self.inner.workers.lock().await.drain().collect();
        for (_, worker) in &workers {
            worker.stop.stop();
        }

        let deadline = Instant::now() + self.inner.config.shutdown_timeout;
        for (oid, worker) in workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.await_worker(&oid, worker.handle, remaining).await;
        }
        info!("Task runtime stopped");
    }

    async fn await_worker(&self, task_oid: &Oid, mut handle: JoinHandle<()>, timeout: Duration) {
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!(task = %task_oid, "Worker did not stop in time, aborting");
            handle.abort();
        }
        // Normally done by the worker itself; covers aborted workers.
        if let Err(e) = self.inner.leases.release(task_oid).await {
            warn!(task = %task_oid, error = %e, "Lease release failed");
        }
    }

    async fn handler_for(&self, category: TaskCategory) -> Option<Arc<dyn TaskHandler>> {
        self.inner.handlers.read().await.get(&category).cloned()
    }

    async fn reap_finished(&self) {
        self.inner
            .workers
            .lock()
            .await
            .retain(|_, worker| !worker.handle.is_finished());
    }

    async fn spawn_worker(&self, task: Task, handler: Arc<dyn TaskHandler>) {
        let oid = task.oid;
        let stop = StopSignal::new();
        let runtime = self.clone();
        let worker_stop = stop.clone();
        let handle = tokio::spawn(async move { runtime.run_worker(task, handler, worker_stop).await });
        self.inner.workers.lock().await.insert(oid, Worker { stop, handle });
        debug!(task = %oid, "Worker started");
    }

    #[instrument(skip(self, task, handler, stop), fields(task = %task.oid, name = %task.name))]
    async fn run_worker(self, mut task: Task, handler: Arc<dyn TaskHandler>, stop: StopSignal) {
        let oid = task.oid;
        match self.drive(&mut task, handler.as_ref(), &stop).await {
            Ok(()) => {}
            Err(e @ TaskError::LeaseLost { .. }) => warn!(error = %e, "Worker stopped"),
            Err(e) => error!(error = %e, "Worker failed"),
        }
        if let Err(e) = self.inner.leases.release(&oid).await {
            warn!(error = %e, "Lease release failed");
        }
    }

    /// Run the task until it closes, is suspended, or is stopped. Recurring
    /// tasks keep their lease between runs.
    async fn drive(&self, task: &mut Task, handler: &dyn TaskHandler, stop: &StopSignal) -> TaskResult<()> {
        let leases = &self.inner.leases;
        loop {
            let context = RunContext::new(self.inner.repository.clone(), leases.clone(), task, stop.clone());
            let run = match handler.run(task, &context).await {
                Ok(run) => run,
                Err(e @ TaskError::LeaseLost { .. }) => return Err(e),
                Err(e) => {
                    error!(error = %e, "Task run failed");
                    let mut result = OperationResult::new("task.run");
                    result.record_fatal_error(e.error_code(), &e);
                    TaskRunResult::new(TaskRunStatus::TemporaryError, result)
                }
            };

            let completion = match run.status {
                TaskRunStatus::Interrupted => {
                    info!(progress = context.progress(), "Task run interrupted");
                    return Ok(());
                }
                TaskRunStatus::PermanentError => RunCompletion::Suspend,
                TaskRunStatus::Finished | TaskRunStatus::TemporaryError => match task.recurrence.interval() {
                    Some(every) => RunCompletion::Reschedule {
                        next_run: Utc::now() + to_chrono(every),
                    },
                    None => RunCompletion::Close,
                },
            };
            leases
                .finish_run(&task.oid, &completion, &run.result, context.progress())
                .await?;

            let RunCompletion::Reschedule { next_run } = completion else {
                return Ok(());
            };
            if !self.wait_until(next_run, stop).await {
                return Ok(());
            }

            let now = Utc::now();
            leases
                .fenced_modify(
                    &task.oid,
                    &[
                        ItemModification::replace(
                            "execution_status",
                            serde_json::to_value(TaskExecutionStatus::Running).map_err(RepoError::from)?,
                        ),
                        ItemModification::replace(
                            "last_run_start_timestamp",
                            serde_json::to_value(now).map_err(RepoError::from)?,
                        ),
                    ],
                )
                .await?;
            *task = self.inner.repository.get(&task.oid).await?;
        }
    }

    /// Sleep until `deadline`. Returns `false` if stopped first.
    async fn wait_until(&self, deadline: chrono::DateTime<Utc>, stop: &StopSignal) -> bool {
        loop {
            if stop.is_stopped() || self.is_shutdown() {
                return false;
            }
            let Ok(remaining) = (deadline - Utc::now()).to_std() else {
                return true;
            };
            if remaining.is_zero() {
                return true;
            }
            sleep(remaining.min(STOP_POLL_INTERVAL)).await;
        }
    }
}
