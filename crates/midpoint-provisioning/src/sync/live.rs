//! Live synchronization.
//!
//! One cycle polls the resource for changes since the token stored in the
//! task extension, processes them in the order received and advances the
//! token only past changes that were fully processed.

use async_trait::async_trait;
use midpoint_ucf::change::{Change, SyncToken};
use midpoint_ucf::resilience::call_with_timeout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::service::SynchronizationService;
use super::statistics::SyncStatistics;
use crate::error::{RepoError, TaskResult};
use crate::ids::Oid;
use crate::result::{OperationResult, OperationResultStatus};
use crate::task::{RunContext, Task, TaskCategory, TaskHandler, TaskRunResult, TaskRunStatus};

/// Task extension key holding the live sync token.
pub const SYNC_TOKEN_KEY: &str = "syncToken";

fn default_max_changes_per_cycle() -> usize {
    1000
}

fn default_token_persist_interval() -> usize {
    1
}

/// Live sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSyncConfig {
    /// Changes taken from one poll; the rest wait for the next cycle.
    #[serde(default = "default_max_changes_per_cycle")]
    pub max_changes_per_cycle: usize,

    /// Persist the token after this many processed changes.
    #[serde(default = "default_token_persist_interval")]
    pub token_persist_interval: usize,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            max_changes_per_cycle: default_max_changes_per_cycle(),
            token_persist_interval: default_token_persist_interval(),
        }
    }
}

/// Report of one live sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleReport {
    pub result: OperationResult,
    pub statistics: SyncStatistics,
    /// Token persisted at the end of the cycle.
    pub token: Option<SyncToken>,
    pub interrupted: bool,
    /// The cycle failed in a way retrying will not fix.
    pub permanent: bool,
}

impl SyncCycleReport {
    fn ended_early(result: OperationResult, token: Option<SyncToken>) -> Self {
        Self {
            result,
            statistics: SyncStatistics::new(),
            token,
            interrupted: false,
            permanent: false,
        }
    }

    fn failed(result: OperationResult, token: Option<SyncToken>, transient: bool) -> Self {
        Self {
            permanent: !transient,
            ..Self::ended_early(result, token)
        }
    }
}

/// Runs live sync cycles.
pub struct LiveSynchronizer {
    service: Arc<SynchronizationService>,
    config: LiveSyncConfig,
}

impl LiveSynchronizer {
    pub fn new(service: Arc<SynchronizationService>, config: LiveSyncConfig) -> Self {
        Self { service, config }
    }

    /// Run one cycle for `resource_oid`.
    ///
    /// Without a stored token the cycle only records the current token.
    /// A failed change is reported and skipped; the token stays at the
    /// last change before it so the failed change is retried next cycle.
    #[instrument(skip(self, context), fields(task = %context.task_oid()))]
    pub async fn run_cycle(&self, resource_oid: &Oid, context: &RunContext) -> TaskResult<SyncCycleReport> {
        let mut result = OperationResult::new("live_sync.cycle").with_param("resource", resource_oid);
        let engine = self.service.engine();
        let resolved = match engine.resources().resolve(context.repository(), resource_oid).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Resource unavailable for live sync");
                result.record_fatal_error(e.error_code(), &e);
                return Ok(SyncCycleReport::failed(result, None, e.is_transient()));
            }
        };
        if !resolved.synchronization().enabled {
            result.record_not_applicable();
            return Ok(SyncCycleReport::ended_early(result, None));
        }
        let object_class = match resolved.account_definition() {
            Ok(definition) => definition.type_name.clone(),
            Err(e) => {
                result.record_fatal_error(e.error_code(), &e);
                return Ok(SyncCycleReport::failed(result, None, e.is_transient()));
            }
        };
        let timeout = resolved.handle.settings().operation_timeout();
        // Held until the cycle ends; other cycles on this resource wait.
        let _cycle = resolved.handle.reserve().await;

        let Some(mut token) = context.load_extension::<SyncToken>(SYNC_TOKEN_KEY).await? else {
            let current = {
                let connector = resolved.handle.acquire().await;
                call_with_timeout("fetch_current_token", timeout, connector.fetch_current_token(&object_class)).await
            };
            return match current {
                Ok(current) => {
                    context.checkpoint(SYNC_TOKEN_KEY, token_value(&current)?).await?;
                    info!(token = %current, "Live sync token initialised");
                    result.add_param("token", &current);
                    result.record_success();
                    Ok(SyncCycleReport::ended_early(result, Some(current)))
                }
                Err(e) => {
                    result.record_fatal_error(e.error_code(), &e);
                    Ok(SyncCycleReport::failed(result, None, e.is_transient()))
                }
            };
        };

        let fetched = {
            let connector = resolved.handle.acquire().await;
            call_with_timeout("fetch_changes", timeout, connector.fetch_changes(&object_class, &token))
                .await
                .map(|stream| stream.take(self.config.max_changes_per_cycle).collect::<Vec<Change>>())
        };
        let changes = match fetched {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "Fetching changes failed");
                result.record_fatal_error(e.error_code(), &e);
                return Ok(SyncCycleReport::failed(result, Some(token), e.is_transient()));
            }
        };

        let mut statistics = SyncStatistics::new();
        statistics.fetched = changes.len() as u64;
        let persist_interval = self.config.token_persist_interval.max(1);
        let mut unpersisted = 0usize;
        let mut frozen = false;
        let mut interrupted = false;

        for change in changes {
            if context.is_stopped() {
                interrupted = true;
                break;
            }

            let sub = result.subresult("live_sync.change");
            sub.add_param("token", &change.token);
            sub.add_param("change_type", change.change_type);
            match self.service.process_change(&resolved, &change).await {
                Ok(outcome) => {
                    let action = outcome.action;
                    outcome.record(sub);
                    if !sub.is_error() {
                        statistics.record(action);
                    }
                }
                Err(e) => {
                    warn!(token = %change.token, error = %e, "Change processing failed");
                    sub.record_fatal_error(e.error_code(), &e);
                }
            }
            let failed = sub.is_error();
            context.record_progress(1);

            if failed {
                statistics.record_failure();
                if !frozen {
                    warn!(token = %token, "Sync token held before failed change");
                    frozen = true;
                }
                continue;
            }
            if !frozen {
                token = change.token;
                unpersisted += 1;
                if unpersisted >= persist_interval {
                    context.checkpoint(SYNC_TOKEN_KEY, token_value(&token)?).await?;
                    unpersisted = 0;
                }
            }
        }
        if unpersisted > 0 {
            context.checkpoint(SYNC_TOKEN_KEY, token_value(&token)?).await?;
        } else {
            context.save_progress().await?;
        }

        statistics.write_params(&mut result);
        result.add_param("token", &token);
        if interrupted {
            result.add_param("interrupted", true);
        }
        result.compute_status();
        info!(
            fetched = statistics.fetched,
            processed = statistics.processed,
            failed = statistics.failed,
            success_rate = statistics.success_rate(),
            token = %token,
            "Live sync cycle finished"
        );
        Ok(SyncCycleReport {
            result,
            statistics,
            token: Some(token),
            interrupted,
            permanent: false,
        })
    }
}

fn token_value(token: &SyncToken) -> TaskResult<serde_json::Value> {
    Ok(serde_json::to_value(token).map_err(RepoError::from)?)
}

/// Task handler running live sync cycles.
pub struct LiveSyncTaskHandler {
    synchronizer: LiveSynchronizer,
}

impl LiveSyncTaskHandler {
    pub fn new(service: Arc<SynchronizationService>, config: LiveSyncConfig) -> Self {
        Self {
            synchronizer: LiveSynchronizer::new(service, config),
        }
    }
}

#[async_trait]
impl TaskHandler for LiveSyncTaskHandler {
    fn category(&self) -> TaskCategory {
        TaskCategory::LiveSync
    }

    async fn run(&self, task: &Task, context: &RunContext) -> TaskResult<TaskRunResult> {
        let report = self.synchronizer.run_cycle(&task.object_ref, context).await?;
        let status = if report.interrupted {
            TaskRunStatus::Interrupted
        } else if report.permanent {
            TaskRunStatus::PermanentError
        } else if report.result.status == OperationResultStatus::FatalError {
            TaskRunStatus::TemporaryError
        } else {
            TaskRunStatus::Finished
        };
        Ok(TaskRunResult::new(status, report.result))
    }
}
