//! Counters of one synchronization run.

use serde::{Deserialize, Serialize};

use super::service::SyncAction;
use crate::result::OperationResult;

/// Per-run synchronization counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Changes or objects received from the resource.
    pub fetched: u64,
    pub processed: u64,
    pub failed: u64,
    pub linked: u64,
    pub focus_created: u64,
    pub updated: u64,
    pub unlinked: u64,
    pub focus_deleted: u64,
    pub ignored: u64,
}

impl SyncStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successfully processed item.
    pub fn record(&mut self, action: SyncAction) {
        self.processed += 1;
        match action {
            SyncAction::Linked => self.linked += 1,
            SyncAction::FocusCreated => self.focus_created += 1,
            SyncAction::Updated => self.updated += 1,
            SyncAction::Unlinked => self.unlinked += 1,
            SyncAction::FocusDeleted => self.focus_deleted += 1,
            SyncAction::Ignored => self.ignored += 1,
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Fraction of handled items that succeeded, in percent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let handled = self.processed + self.failed;
        if handled == 0 {
            return 100.0;
        }
        (self.processed as f64 / handled as f64) * 100.0
    }

    /// Attach the counters to a result node.
    pub fn write_params(&self, result: &mut OperationResult) {
        result.add_param("fetched", self.fetched);
        result.add_param("processed", self.processed);
        result.add_param("failed", self.failed);
        for (key, value) in [
            ("linked", self.linked),
            ("focus_created", self.focus_created),
            ("updated", self.updated),
            ("unlinked", self.unlinked),
            ("focus_deleted", self.focus_deleted),
            ("ignored", self.ignored),
        ] {
            if value > 0 {
                result.add_param(key, value);
            }
        }
    }
}
