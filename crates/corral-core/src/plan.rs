//! Claim plans and execution reports.

use crate::ids::TaskId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Why a ready candidate was not selected.
///
/// These are expected scheduling outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A live lease already holds the task.
    AlreadyActive,
    /// A successful claim for the task is still inside the dedup window.
    Deduplicated,
    /// The task's changed files overlap an active or selected task.
    Conflict,
    /// The task's lease file exists but cannot be parsed; never claimed over.
    Corrupted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlreadyActive => "already_active",
            Self::Deduplicated => "deduplicated",
            Self::Conflict => "conflict",
            Self::Corrupted => "corrupted",
        };
        write!(f, "{}", name)
    }
}

/// The pure output of the queue arbiter's planning pass.
///
/// Building a plan has no side effects; the same inputs always produce the
/// same plan, for dry-runs and for the prelude of a real run alike.
/// Candidates beyond the concurrency bound appear in neither `selected` nor
/// `skipped` — they were never evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Tasks to claim, in readiness order.
    pub selected: Vec<TaskId>,

    /// Evaluated candidates that were passed over, with the reason.
    pub skipped: Vec<(TaskId, SkipReason)>,

    /// Selected tasks whose stale lease must be stolen rather than acquired.
    pub touched_leases: Vec<TaskId>,

    /// Existing workspaces for evaluated candidates.
    pub workspace_paths: BTreeMap<TaskId, PathBuf>,
}

impl Plan {
    /// An empty plan.
    pub fn empty() -> Self {
        Self {
            selected: Vec::new(),
            skipped: Vec::new(),
            touched_leases: Vec::new(),
            workspace_paths: BTreeMap::new(),
        }
    }

    /// True if nothing would be claimed.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Whether the given selected task requires a steal.
    pub fn requires_steal(&self, task_id: &TaskId) -> bool {
        self.touched_leases.contains(task_id)
    }
}

/// Outcome of executing one selected claim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ClaimOutcome {
    /// The task was claimed and handed to the executor.
    Claimed {
        /// Liveness handle holding the lease.
        pane: String,
        /// Workspace the executor was pointed at.
        workspace: PathBuf,
    },
    /// The claim raced and lost after planning; expected, not an error.
    Lost {
        /// The contention reason observed.
        reason: String,
    },
    /// A step failed after the candidate was selected.
    Failed {
        /// The error that stopped this task; later tasks still ran.
        error: String,
    },
}

/// Per-task results of executing a plan.
///
/// One task failing never aborts the rest; every selected task gets an
/// independent outcome here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteReport {
    /// Outcomes in the order the plan selected them.
    pub outcomes: Vec<(TaskId, ClaimOutcome)>,
}

impl ExecuteReport {
    /// Number of tasks successfully claimed.
    pub fn claimed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ClaimOutcome::Claimed { .. }))
            .count()
    }

    /// Number of tasks that failed or lost the race.
    pub fn not_claimed(&self) -> usize {
        self.outcomes.len() - self.claimed()
    }

    /// True when some but not all selected tasks were claimed.
    pub fn is_partial(&self) -> bool {
        let claimed = self.claimed();
        claimed > 0 && claimed < self.outcomes.len()
    }
}
