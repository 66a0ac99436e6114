//! Operation results.
//!
//! Every engine operation records its outcome into a tree of
//! [`OperationResult`] nodes. Failures of independent sub-operations (one
//! resource out of several, one change out of a batch) stay in their own
//! subresult; the parent aggregates them with [`OperationResult::compute_status`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of one operation result node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResultStatus {
    Success,
    Warning,
    /// Some sub-operations failed.
    PartialError,
    FatalError,
    /// An error occurred but was compensated.
    HandledError,
    InProgress,
    NotApplicable,
    Unknown,
}

impl OperationResultStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResultStatus::Success => "success",
            OperationResultStatus::Warning => "warning",
            OperationResultStatus::PartialError => "partial_error",
            OperationResultStatus::FatalError => "fatal_error",
            OperationResultStatus::HandledError => "handled_error",
            OperationResultStatus::InProgress => "in_progress",
            OperationResultStatus::NotApplicable => "not_applicable",
            OperationResultStatus::Unknown => "unknown",
        }
    }

    /// Whether the status reports an unresolved failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OperationResultStatus::FatalError | OperationResultStatus::PartialError
        )
    }
}

impl fmt::Display for OperationResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(OperationResultStatus::Success),
            "warning" => Ok(OperationResultStatus::Warning),
            "partial_error" => Ok(OperationResultStatus::PartialError),
            "fatal_error" => Ok(OperationResultStatus::FatalError),
            "handled_error" => Ok(OperationResultStatus::HandledError),
            "in_progress" => Ok(OperationResultStatus::InProgress),
            "not_applicable" => Ok(OperationResultStatus::NotApplicable),
            "unknown" => Ok(OperationResultStatus::Unknown),
            _ => Err(format!("Unknown operation result status: {s}")),
        }
    }
}

/// One node of an operation result tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Operation name, e.g. `provisioning.modify_shadow`.
    pub operation: String,

    pub status: OperationResultStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Stable code of the error that produced the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subresults: Vec<OperationResult>,
}

impl OperationResult {
    /// Create a result with unknown status.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: OperationResultStatus::Unknown,
            message: None,
            error_code: None,
            params: BTreeMap::new(),
            subresults: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.add_param(key, value);
        self
    }

    /// Add or overwrite a parameter.
    pub fn add_param(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.params.insert(key.into(), value.to_string());
    }

    /// Open a child result and return it for recording.
    pub fn subresult(&mut self, operation: impl Into<String>) -> &mut OperationResult {
        let index = self.subresults.len();
        self.subresults.push(OperationResult::new(operation));
        &mut self.subresults[index]
    }

    /// Attach a finished child result.
    pub fn add_subresult(&mut self, result: OperationResult) {
        self.subresults.push(result);
    }

    pub fn record_success(&mut self) {
        self.status = OperationResultStatus::Success;
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.status = OperationResultStatus::Warning;
        self.message = Some(message.into());
    }

    pub fn record_not_applicable(&mut self) {
        self.status = OperationResultStatus::NotApplicable;
    }

    pub fn record_in_progress(&mut self) {
        self.status = OperationResultStatus::InProgress;
    }

    /// Record an error that was compensated and needs no attention.
    pub fn record_handled_error(&mut self, message: impl Into<String>) {
        self.status = OperationResultStatus::HandledError;
        self.message = Some(message.into());
    }

    /// Record a failure of this operation.
    pub fn record_fatal_error(&mut self, error_code: &str, message: impl fmt::Display) {
        self.status = OperationResultStatus::FatalError;
        self.error_code = Some(error_code.to_string());
        self.message = Some(message.to_string());
    }

    /// Derive this node's status from its children.
    ///
    /// A fatal error recorded directly on this node is kept. Children that
    /// are not applicable do not count.
    pub fn compute_status(&mut self) {
        if self.status == OperationResultStatus::FatalError {
            return;
        }

        let relevant: Vec<OperationResultStatus> = self
            .subresults
            .iter()
            .map(|r| r.status)
            .filter(|s| *s != OperationResultStatus::NotApplicable)
            .collect();
        if relevant.is_empty() {
            if self.status == OperationResultStatus::Unknown {
                self.status = if self.subresults.is_empty() {
                    OperationResultStatus::Success
                } else {
                    OperationResultStatus::NotApplicable
                };
            }
            return;
        }

        let failed = relevant.iter().filter(|s| s.is_error()).count();
        self.status = if failed == relevant.len() {
            OperationResultStatus::FatalError
        } else if failed > 0 {
            OperationResultStatus::PartialError
        } else if relevant.iter().any(|s| {
            matches!(
                s,
                OperationResultStatus::Warning | OperationResultStatus::HandledError
            )
        }) {
            OperationResultStatus::Warning
        } else if relevant.contains(&OperationResultStatus::InProgress) {
            OperationResultStatus::InProgress
        } else {
            OperationResultStatus::Success
        };

        if failed > 0 && self.message.is_none() {
            self.message = Some(format!("{failed} of {} sub-operations failed", relevant.len()));
        }
    }

    /// Whether the operation completed without an unresolved failure.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OperationResultStatus::Success
                | OperationResultStatus::Warning
                | OperationResultStatus::HandledError
                | OperationResultStatus::NotApplicable
        )
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Failed leaf results anywhere in the tree.
    pub fn failures(&self) -> Vec<&OperationResult> {
        let mut found = Vec::new();
        self.collect_failures(&mut found);
        found
    }

    fn collect_failures<'a>(&'a self, found: &mut Vec<&'a OperationResult>) {
        if self.subresults.is_empty() {
            if self.status == OperationResultStatus::FatalError {
                found.push(self);
            }
            return;
        }
        for child in &self.subresults {
            child.collect_failures(found);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(status: OperationResultStatus) -> OperationResult {
        let mut r = OperationResult::new("child");
        r.status = status;
        r
    }

    #[test]
    fn test_compute_status_aggregates_children() {
        let mut all_ok = OperationResult::new("parent");
        all_ok.add_subresult(child(OperationResultStatus::Success));
        all_ok.add_subresult(child(OperationResultStatus::NotApplicable));
        all_ok.compute_status();
        assert_eq!(all_ok.status, OperationResultStatus::Success);

        let mut partial = OperationResult::new("parent");
        partial.add_subresult(child(OperationResultStatus::Success));
        partial.add_subresult(child(OperationResultStatus::FatalError));
        partial.compute_status();
        assert_eq!(partial.status, OperationResultStatus::PartialError);
        assert_eq!(partial.message.as_deref(), Some("1 of 2 sub-operations failed"));

        let mut fatal = OperationResult::new("parent");
        fatal.add_subresult(child(OperationResultStatus::FatalError));
        fatal.add_subresult(child(OperationResultStatus::PartialError));
        fatal.compute_status();
        assert_eq!(fatal.status, OperationResultStatus::FatalError);

        let mut warned = OperationResult::new("parent");
        warned.add_subresult(child(OperationResultStatus::Success));
        warned.add_subresult(child(OperationResultStatus::HandledError));
        warned.compute_status();
        assert_eq!(warned.status, OperationResultStatus::Warning);
    }

    #[test]
    fn test_compute_status_without_children() {
        let mut r = OperationResult::new("leaf");
        r.compute_status();
        assert_eq!(r.status, OperationResultStatus::Success);

        let mut r = OperationResult::new("leaf");
        r.record_fatal_error("SCHEMA", "bad request");
        r.add_subresult(child(OperationResultStatus::Success));
        r.compute_status();
        assert_eq!(r.status, OperationResultStatus::FatalError);
    }

    #[test]
    fn test_failures_collects_leaves() {
        let mut root = OperationResult::new("root");
        root.subresult("a").record_success();
        root.subresult("b")
            .record_fatal_error("COMMUNICATION", "connection refused");
        root.compute_status();

        let failures = root.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "b");
        assert_eq!(failures[0].error_code.as_deref(), Some("COMMUNICATION"));
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let r = OperationResult::new("op").with_param("resource", "r1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["params"]["resource"], "r1");
        assert!(json.get("subresults").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "partial_error".parse::<OperationResultStatus>().unwrap(),
            OperationResultStatus::PartialError
        );
        assert!("bogus".parse::<OperationResultStatus>().is_err());
    }
}
