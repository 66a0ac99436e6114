//! Synchronization of resource changes into the repository.
//!
//! - [`SynchronizationService`] - situation and reaction for one change
//! - [`LiveSynchronizer`] - token-driven polling of the change log
//! - [`ResourceImporter`] - full enumeration of existing accounts

mod import;
mod live;
mod service;
mod statistics;

pub use import::{ImportReport, ImportTaskHandler, ResourceImporter};
pub use live::{LiveSyncConfig, LiveSyncTaskHandler, LiveSynchronizer, SyncCycleReport, SYNC_TOKEN_KEY};
pub use service::{SyncAction, SyncOutcome, SynchronizationService};
pub use statistics::SyncStatistics;
