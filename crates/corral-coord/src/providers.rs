//! Capability seams for the external collaborators.
//!
//! The core depends only on these traits; the CLI supplies the concrete
//! tmux/git implementations and [`crate::testing`] supplies in-memory
//! fakes. All traits are synchronous: the core has no runtime of its own.

use corral_core::{CoreError, TaskId};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Ground truth for lease liveness.
///
/// A lease file is never trusted on its own; whether its handle still
/// denotes a live runtime unit is always answered here.
pub trait LivenessOracle {
    /// Whether `handle` (e.g. a tmux pane id) is still alive.
    fn is_alive(&self, handle: &str) -> Result<bool, CoreError>;
}

/// Ordered, dependency-resolved ready tasks from the external tracker.
///
/// The order returned here is the scheduling order; the arbiter adds no
/// priority of its own.
pub trait ReadinessProvider {
    /// Task ids ready to be claimed, in execution order.
    fn ready_tasks(&self) -> Result<Vec<TaskId>, CoreError>;
}

/// Isolated per-task working directories (a version-control worktree
/// abstraction). The core only ever holds paths; it issues no VCS commands.
pub trait WorkspaceProvider {
    /// Create (or reuse) the workspace for a task, branched from `base_ref`.
    fn ensure(&self, task_id: &TaskId, base_ref: &str) -> Result<PathBuf, CoreError>;

    /// Remove a workspace. Returns false if it was already gone.
    fn remove(&self, path: &Path) -> Result<bool, CoreError>;

    /// All workspaces currently on disk, keyed by task.
    fn list(&self) -> Result<Vec<(TaskId, PathBuf)>, CoreError>;

    /// Files changed in the workspace relative to its base.
    fn diff_from_base(&self, path: &Path) -> Result<BTreeSet<String>, CoreError>;
}

/// A provisioned runtime unit: the pane is the lease handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Liveness handle (tmux pane id).
    pub pane: String,

    /// Human-readable window name.
    pub window: String,
}

/// Hand-off point that runs the actual work.
///
/// Provisioning happens before the claim so the lease can be bound to a
/// handle that is already live; a unit whose claim loses the race is torn
/// down best-effort.
pub trait Executor {
    /// Create the runtime unit for a task and return its handle.
    fn provision(&self, task_id: &TaskId) -> Result<WorkerHandle, CoreError>;

    /// Start the agent for a claimed task inside its workspace.
    fn launch(
        &self,
        task_id: &TaskId,
        handle: &WorkerHandle,
        workspace: &Path,
    ) -> Result<(), CoreError>;

    /// Tear down a provisioned unit that never got (or lost) its claim.
    fn teardown(&self, handle: &WorkerHandle) -> Result<(), CoreError>;
}
