//! Shadow reconciliation.
//!
//! The [`ReconciliationEngine`] owns the focus and shadow operations:
//! provisioning accounts for assignments, propagating focus modifications
//! to linked accounts, unlinking and cascading deletes.

mod engine;

pub use engine::{FocusOutcome, ReconciliationEngine};

pub(crate) use engine::{add_link_ref, ignore_not_found, remove_link_ref};
