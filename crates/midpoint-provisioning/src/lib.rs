//! # Provisioning
//!
//! Shadow reconciliation, synchronization and the task runtime on top of
//! the Unified Connector Framework.
//!
//! This crate provides:
//! - A repository contract with an in-memory implementation and a scoped
//!   request cache
//! - The focus (user), resource and shadow model
//! - Outbound and inbound attribute mappings
//! - The Shadow Reconciliation Engine translating focus changes into
//!   connector operations
//! - Live synchronization and import from resource
//! - A task runtime with lease-based exclusive claims
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  claim   ┌───────────────┐  changes  ┌──────────────────┐
//! │ Task Runtime │─────────►│ Live Sync /   │──────────►│ Synchronization  │
//! │  (leases)    │          │ Import        │           │ Service          │
//! └──────────────┘          └───────┬───────┘           └────────┬─────────┘
//!                                   │                            │
//!                                   ▼                            ▼
//!                           ┌───────────────┐           ┌──────────────────┐
//!                           │  Connector    │◄──────────│ Reconciliation   │
//!                           │  Instance     │  writes   │ Engine           │
//!                           └───────────────┘           └────────┬─────────┘
//!                                                                │
//!                                                       ┌────────▼─────────┐
//!                                                       │   Repository     │
//!                                                       └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use midpoint_provisioning::prelude::*;
//!
//! let engine = Arc::new(ReconciliationEngine::new(repository.clone(), ResourceManager::new(factory)));
//! let user = User::new("jack")
//!     .with_property("fullName", ["Jack Sparrow"])
//!     .with_password("deadmentellnotales")
//!     .with_assignment(resource_oid);
//! let outcome = engine.add_focus(user).await?;
//! assert!(outcome.result.is_success());
//! ```

pub mod error;
pub mod focus;
pub mod ids;
pub mod mapping;
pub mod reconciliation;
pub mod repository;
pub mod resource;
pub mod result;
pub mod shadow;
pub mod sync;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        ProvisioningError, ProvisioningResult, RepoError, RepoResult, TaskError, TaskResult,
    };
    pub use crate::focus::{FocusModification, User};
    pub use crate::ids::{NodeId, Oid};
    pub use crate::mapping::{InboundMapping, MappingSource, OutboundMapping, RegexPattern, Transform};
    pub use crate::reconciliation::{FocusOutcome, ReconciliationEngine};
    pub use crate::repository::{
        InMemoryRepository, ItemModification, ObjectQuery, ObjectType, Repository,
        RepositoryCache, RepositoryExt,
    };
    pub use crate::resource::{
        DeletedReaction, ResolvedResource, Resource, ResourceManager, SynchronizationPolicy,
        UnmatchedReaction,
    };
    pub use crate::result::{OperationResult, OperationResultStatus};
    pub use crate::shadow::{Shadow, ShadowLifecycleState, SyncSituation};
    pub use crate::sync::{
        ImportTaskHandler, LiveSyncConfig, LiveSyncTaskHandler, SyncAction, SynchronizationService,
    };
    pub use crate::task::{Task, TaskExecutionStatus, TaskRuntime, TaskRuntimeConfig};
}

pub use error::{ProvisioningError, ProvisioningResult, TaskError, TaskResult};
pub use ids::{NodeId, Oid};
pub use reconciliation::{FocusOutcome, ReconciliationEngine};
pub use repository::{InMemoryRepository, Repository, RepositoryExt};
pub use resource::{Resource, ResourceManager};
pub use result::{OperationResult, OperationResultStatus};
pub use sync::{LiveSynchronizer, ResourceImporter, SynchronizationService};
pub use task::{TaskRuntime, TaskRuntimeConfig};
