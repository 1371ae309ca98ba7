//! Task lifecycle states and per-task state records.

use crate::error::CoreError;
use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Known to the tracker but not yet claimed.
    Queued,
    /// Lease acquired, work not yet started.
    Claimed,
    /// Agent actively working.
    InProgress,
    /// Work suspended, lease retained.
    Paused,
    /// Work finished successfully.
    Completed,
    /// Work failed or was abandoned.
    Failed,
}

impl TaskState {
    /// Returns true if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the transition `self -> to` is allowed.
    ///
    /// This is the single encoding of the transition table; everything else
    /// in the system defers to it.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Queued, Claimed)
                | (Claimed, InProgress)
                | (Claimed, Failed)
                | (InProgress, Paused)
                | (Paused, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "QUEUED",
            Self::Claimed => "CLAIMED",
            Self::InProgress => "IN_PROGRESS",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// One applied transition in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State before the transition.
    pub from: TaskState,

    /// State after the transition.
    pub to: TaskState,

    /// When the transition was applied.
    pub at: DateTime<Utc>,

    /// Free-form context supplied by the caller (window name, error, ...).
    pub context: String,
}

/// Per-task lifecycle state plus its append-only transition history.
///
/// Records are created the moment a lease is claimed and retired (kept on
/// disk, never deleted) once a terminal state is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Task this record belongs to.
    pub task_id: TaskId,

    /// Current lifecycle state.
    pub state: TaskState,

    /// Applied transitions, oldest first. Rejected attempts never appear here.
    pub history: Vec<StateTransition>,
}

impl StateRecord {
    /// Create the record for a freshly claimed task.
    ///
    /// Claiming is the implicit `QUEUED -> CLAIMED` transition, so the
    /// history starts with that entry.
    pub fn claimed(task_id: TaskId, context: impl Into<String>) -> Self {
        Self {
            task_id,
            state: TaskState::Claimed,
            history: vec![StateTransition {
                from: TaskState::Queued,
                to: TaskState::Claimed,
                at: Utc::now(),
                context: context.into(),
            }],
        }
    }

    /// Apply a transition, enforcing the table.
    ///
    /// On rejection nothing is mutated: the state stays as it was and no
    /// history entry is added.
    pub fn apply(&mut self, to: TaskState, context: impl Into<String>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.history.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
            context: context.into(),
        });
        self.state = to;
        Ok(())
    }

    /// Returns true if the record has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use TaskState::*;
        let allowed = [
            (Queued, Claimed),
            (Claimed, InProgress),
            (Claimed, Failed),
            (InProgress, Paused),
            (Paused, InProgress),
            (InProgress, Completed),
            (InProgress, Failed),
            (Paused, Failed),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from} -> {to} should be allowed");
        }
    }

    #[test]
    fn test_rejected_transitions() {
        use TaskState::*;
        let rejected = [
            (Queued, Completed),
            (Queued, InProgress),
            (Claimed, Paused),
            (Claimed, Completed),
            (Paused, Completed),
            (Completed, Failed),
            (Failed, Claimed),
            (InProgress, Claimed),
        ];
        for (from, to) in rejected {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
        }
    }

    #[test]
    fn test_invalid_apply_is_noop() {
        let mut record = StateRecord::claimed(TaskId::new("t1"), "claim");
        let before = record.clone();

        let err = record.apply(TaskState::Completed, "skip ahead").unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(record, before, "rejected transition must not mutate");
    }

    #[test]
    fn test_full_lifecycle_history() {
        let mut record = StateRecord::claimed(TaskId::new("t1"), "claim");
        record.apply(TaskState::InProgress, "start").unwrap();
        record.apply(TaskState::Paused, "lunch").unwrap();
        record.apply(TaskState::InProgress, "resume").unwrap();
        record.apply(TaskState::Completed, "done").unwrap();

        assert!(record.is_terminal());
        assert_eq!(record.history.len(), 5);
        assert_eq!(record.history[0].from, TaskState::Queued);
        assert_eq!(record.history.last().unwrap().to, TaskState::Completed);
    }
}
