//! Audit events appended to the event log.

use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result string for an operation that succeeded.
pub const RESULT_OK: &str = "ok";
/// Result string for a candidate that was skipped.
pub const RESULT_SKIPPED: &str = "skipped";
/// Result string for a rejected state transition.
pub const RESULT_INVALID: &str = "invalid";
/// Result string for a genuine failure.
pub const RESULT_ERROR: &str = "error";

/// One immutable audit record: a single JSON object per log line.
///
/// Extra context keys are flattened into the top-level object, matching the
/// wire shape `{"ts": ..., "cmd": ..., "task": ..., "pane": ..., "result": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// When the event was recorded (UTC).
    pub ts: DateTime<Utc>,

    /// Command or operation name (`claim`, `release`, `transition`, ...).
    pub cmd: String,

    /// Task the event concerns, if any.
    pub task: Option<TaskId>,

    /// Liveness handle involved, if any.
    pub pane: Option<String>,

    /// Outcome: `ok`, `skipped`, `invalid`, or `error`.
    pub result: String,

    /// Event-specific context (reason, from/to states, error text, ...).
    #[serde(flatten)]
    pub context: BTreeMap<String, String>,
}

impl EventRecord {
    /// Create a new event stamped now.
    pub fn new(cmd: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            cmd: cmd.into(),
            task: None,
            pane: None,
            result: result.into(),
            context: BTreeMap::new(),
        }
    }

    /// Builder method to set the task.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task = Some(task_id);
        self
    }

    /// Builder method to set the pane handle.
    pub fn with_pane(mut self, pane: impl Into<String>) -> Self {
        self.pane = Some(pane.into());
        self
    }

    /// Builder method to add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// A successful claim (acquire or steal).
    pub fn claim_ok(task_id: TaskId, pane: impl Into<String>, stolen: bool) -> Self {
        Self::new("claim", RESULT_OK)
            .with_task(task_id)
            .with_pane(pane)
            .with_context("stolen", stolen.to_string())
    }

    /// A candidate skipped during planning or execution.
    pub fn claim_skipped(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self::new("claim", RESULT_SKIPPED)
            .with_task(task_id)
            .with_context("reason", reason)
    }

    /// A claim attempt that failed partway through execution.
    pub fn claim_failed(task_id: TaskId, error: impl std::fmt::Display) -> Self {
        Self::new("claim", RESULT_ERROR)
            .with_task(task_id)
            .with_context("error", error.to_string())
    }

    /// An applied state transition.
    pub fn transition_applied(task_id: TaskId, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new("transition", RESULT_OK)
            .with_task(task_id)
            .with_context("from", from)
            .with_context("to", to)
    }

    /// A rejected state transition (attempted, not applied).
    pub fn transition_rejected(
        task_id: TaskId,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::new("transition", RESULT_INVALID)
            .with_task(task_id)
            .with_context("from", from)
            .with_context("to", to)
    }

    /// A lease release.
    pub fn release(task_id: TaskId, forced: bool) -> Self {
        Self::new("release", RESULT_OK)
            .with_task(task_id)
            .with_context("forced", forced.to_string())
    }

    /// A workspace rollback, logged separately from the FAILED transition.
    pub fn rollback(task_id: TaskId, result: impl Into<String>) -> Self {
        Self::new("rollback", result).with_task(task_id)
    }

    /// An item removed (or not) by the orphan reconciler.
    pub fn reconcile(item: impl Into<String>, result: impl Into<String>) -> Self {
        Self::new("reconcile", result).with_context("item", item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_ok_shape() {
        let event = EventRecord::claim_ok(TaskId::new("t1"), "%3", true);
        assert_eq!(event.cmd, "claim");
        assert_eq!(event.result, RESULT_OK);
        assert_eq!(event.pane.as_deref(), Some("%3"));
        assert_eq!(event.context.get("stolen").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_transition_rejected_carries_pair() {
        let event = EventRecord::transition_rejected(TaskId::new("t1"), "QUEUED", "COMPLETED");
        assert_eq!(event.result, RESULT_INVALID);
        assert_eq!(event.context.get("from").map(String::as_str), Some("QUEUED"));
        assert_eq!(event.context.get("to").map(String::as_str), Some("COMPLETED"));
    }
}
