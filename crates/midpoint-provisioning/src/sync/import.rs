//! Import from resource.
//!
//! Enumerates every account of the managed object class and feeds each one
//! through synchronization as if the resource had reported it as added.

use async_trait::async_trait;
use midpoint_ucf::change::{Change, SyncToken};
use midpoint_ucf::resilience::call_with_timeout;
use midpoint_ucf::types::ChangeType;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::service::SynchronizationService;
use super::statistics::SyncStatistics;
use crate::error::TaskResult;
use crate::ids::Oid;
use crate::result::{OperationResult, OperationResultStatus};
use crate::task::{RunContext, Task, TaskCategory, TaskHandler, TaskRunResult, TaskRunStatus};

/// Persist progress after this many objects.
const PROGRESS_INTERVAL: u64 = 100;

/// Report of one import run.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub result: OperationResult,
    pub statistics: SyncStatistics,
    pub interrupted: bool,
    /// The import could not start and retrying will not fix it.
    pub permanent: bool,
}

impl ImportReport {
    fn failed(result: OperationResult, transient: bool) -> Self {
        Self {
            result,
            statistics: SyncStatistics::new(),
            interrupted: false,
            permanent: !transient,
        }
    }
}

/// Imports accounts of a resource.
pub struct ResourceImporter {
    service: Arc<SynchronizationService>,
}

impl ResourceImporter {
    pub fn new(service: Arc<SynchronizationService>) -> Self {
        Self { service }
    }

    /// Import all accounts of `resource_oid`. Failures of single accounts
    /// are recorded and do not stop the import.
    #[instrument(skip(self, context), fields(task = %context.task_oid()))]
    pub async fn import(&self, resource_oid: &Oid, context: &RunContext) -> TaskResult<ImportReport> {
        let mut result = OperationResult::new("import.run").with_param("resource", resource_oid);
        let resolved = match self
            .service
            .engine()
            .resources()
            .resolve(context.repository(), resource_oid)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                result.record_fatal_error(e.error_code(), &e);
                return Ok(ImportReport::failed(result, e.is_transient()));
            }
        };
        let definition = match resolved.account_definition() {
            Ok(definition) => definition.clone(),
            Err(e) => {
                result.record_fatal_error(e.error_code(), &e);
                return Ok(ImportReport::failed(result, e.is_transient()));
            }
        };

        let timeout = resolved.handle.settings().operation_timeout();
        // Held until the cycle ends; other cycles on this resource wait.
        let _cycle = resolved.handle.reserve().await;
        let searched = {
            let connector = resolved.handle.acquire().await;
            call_with_timeout("search_objects", timeout, connector.search_objects(&definition.type_name)).await
        };
        let objects = match searched {
            Ok(objects) => objects,
            Err(e) => {
                warn!(error = %e, "Account search failed");
                result.record_fatal_error(e.error_code(), &e);
                return Ok(ImportReport::failed(result, e.is_transient()));
            }
        };
        let mut statistics = SyncStatistics::new();
        statistics.fetched = objects.len() as u64;
        info!(count = objects.len(), "Importing accounts");

        let mut interrupted = false;
        let mut since_save = 0;
        for object in objects {
            if context.is_stopped() {
                interrupted = true;
                break;
            }

            let identifiers = definition.identifiers_of(&object);
            let sub = result.subresult("import.object");
            sub.add_param("identifiers", &identifiers);
            let change = Change::new(
                ChangeType::Add,
                definition.type_name.clone(),
                identifiers,
                SyncToken::new(serde_json::Value::Null),
            )
            .with_current_object(object);

            match self.service.process_change(&resolved, &change).await {
                Ok(outcome) => {
                    let action = outcome.action;
                    outcome.record(sub);
                    if sub.is_error() {
                        statistics.record_failure();
                    } else {
                        statistics.record(action);
                    }
                }
                Err(e) => {
                    warn!(identifiers = %change.identifiers, error = %e, "Account import failed");
                    sub.record_fatal_error(e.error_code(), &e);
                    statistics.record_failure();
                }
            }

            context.record_progress(1);
            since_save += 1;
            if since_save >= PROGRESS_INTERVAL {
                context.save_progress().await?;
                since_save = 0;
            }
        }
        context.save_progress().await?;

        statistics.write_params(&mut result);
        if interrupted {
            result.add_param("interrupted", true);
        }
        result.compute_status();
        info!(
            processed = statistics.processed,
            failed = statistics.failed,
            success_rate = statistics.success_rate(),
            "Import finished"
        );
        Ok(ImportReport {
            result,
            statistics,
            interrupted,
            permanent: false,
        })
    }
}

/// Task handler running imports.
pub struct ImportTaskHandler {
    importer: ResourceImporter,
}

impl ImportTaskHandler {
    pub fn new(service: Arc<SynchronizationService>) -> Self {
        Self {
            importer: ResourceImporter::new(service),
        }
    }
}

#[async_trait]
impl TaskHandler for ImportTaskHandler {
    fn category(&self) -> TaskCategory {
        TaskCategory::Import
    }

    async fn run(&self, task: &Task, context: &RunContext) -> TaskResult<TaskRunResult> {
        let report = self.importer.import(&task.object_ref, context).await?;
        let status = if report.interrupted {
            TaskRunStatus::Interrupted
        } else if report.permanent {
            TaskRunStatus::PermanentError
        } else if report.result.status == OperationResultStatus::FatalError && report.statistics.fetched == 0 {
            TaskRunStatus::TemporaryError
        } else {
            TaskRunStatus::Finished
        };
        Ok(TaskRunResult::new(status, report.result))
    }
}
