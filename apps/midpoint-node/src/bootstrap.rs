//! Startup data loading.
//!
//! A bootstrap file seeds the in-memory repository with resources, users
//! and tasks before the task runtime starts. Users go through the
//! reconciliation engine so their assigned accounts get provisioned.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use midpoint_provisioning::prelude::*;
use midpoint_provisioning::repository::RepositoryObject;

/// Objects loaded at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// What a bootstrap run stored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub resources: usize,
    pub users: usize,
    /// Users stored but with at least one account that failed to provision.
    pub users_with_errors: usize,
    pub tasks: usize,
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Cannot read bootstrap file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid bootstrap file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl Bootstrap {
    pub fn from_json(path: &str, json: &str) -> Result<Self, BootstrapError> {
        serde_json::from_str(json).map_err(|source| BootstrapError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, BootstrapError> {
        let display = path.display().to_string();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| BootstrapError::Io {
                path: display.clone(),
                source,
            })?;
        Self::from_json(&display, &json)
    }

    /// Store everything. Objects whose OID is already taken are skipped.
    #[instrument(skip_all, name = "node_bootstrap")]
    pub async fn apply(
        self,
        repository: &dyn Repository,
        engine: &ReconciliationEngine,
        runtime: &TaskRuntime,
    ) -> Result<BootstrapReport, BootstrapError> {
        let mut report = BootstrapReport::default();

        for resource in &self.resources {
            if store(repository, resource).await? {
                report.resources += 1;
            } else {
                report.skipped += 1;
            }
        }

        for user in self.users {
            if repository.find::<User>(&user.oid).await?.is_some() {
                warn!(oid = %user.oid, "User already stored, skipping");
                report.skipped += 1;
                continue;
            }
            let name = user.name.clone();
            let outcome = engine.add_focus(user).await?;
            if outcome.result.status.is_error() {
                warn!(
                    user = %name,
                    status = %outcome.result.status,
                    message = outcome.result.message.as_deref().unwrap_or(""),
                    "User stored with provisioning errors"
                );
                report.users_with_errors += 1;
            }
            report.users += 1;
        }

        for task in &self.tasks {
            if repository.find::<Task>(&task.oid).await?.is_some() {
                warn!(oid = %task.oid, "Task already stored, skipping");
                report.skipped += 1;
                continue;
            }
            runtime.submit(task).await?;
            report.tasks += 1;
        }

        info!(
            resources = report.resources,
            users = report.users,
            users_with_errors = report.users_with_errors,
            tasks = report.tasks,
            skipped = report.skipped,
            "Bootstrap completed"
        );
        Ok(report)
    }
}

async fn store<T: RepositoryObject>(
    repository: &dyn Repository,
    object: &T,
) -> Result<bool, BootstrapError> {
    match repository.add(object).await {
        Ok(_) => Ok(true),
        Err(RepoError::AlreadyExists { .. }) => {
            warn!(object_type = %T::OBJECT_TYPE, oid = %object.oid(), "Object already stored, skipping");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
