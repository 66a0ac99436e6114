//! Asynchronous tasks.
//!
//! - [`Task`] - persisted job descriptor with status, lease and extension bag
//! - [`LeaseManager`] - claim, renew and release through version CAS
//! - [`TaskHandler`] - the work behind a task category
//! - [`TaskRuntime`] - scan, claim and worker lifecycle on one node

mod handler;
mod lease;
mod model;
mod runtime;

pub use handler::{RunContext, StopSignal, TaskHandler, TaskRunResult, TaskRunStatus};
pub use lease::{LeaseManager, RunCompletion};
pub use model::{Task, TaskCategory, TaskExclusivityStatus, TaskExecutionStatus, TaskLease, TaskRecurrence};
pub use runtime::{TaskRuntime, TaskRuntimeConfig};
