//! In-memory fakes for the provider traits.
//!
//! Public so that downstream crates can test against the same doubles the
//! core's own tests use. All fakes share interior state behind `Arc`, so a
//! clone kept by the test observes everything the component under test did.

use crate::providers::{Executor, LivenessOracle, ReadinessProvider, WorkerHandle, WorkspaceProvider};
use corral_core::{CoreError, TaskId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Liveness oracle over an explicit set of live handles.
#[derive(Debug, Clone, Default)]
pub struct FakeOracle {
    alive: Arc<Mutex<HashSet<String>>>,
}

impl FakeOracle {
    /// New oracle with no live handles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a handle live or dead.
    pub fn set_alive(&self, handle: &str, alive: bool) {
        let mut set = self.alive.lock().unwrap();
        if alive {
            set.insert(handle.to_string());
        } else {
            set.remove(handle);
        }
    }
}

impl LivenessOracle for FakeOracle {
    fn is_alive(&self, handle: &str) -> Result<bool, CoreError> {
        Ok(self.alive.lock().unwrap().contains(handle))
    }
}

/// Fixed, ordered readiness list.
#[derive(Debug, Clone, Default)]
pub struct FakeReadiness {
    tasks: Vec<TaskId>,
}

impl FakeReadiness {
    /// Readiness provider returning the given ids in order.
    pub fn new(ids: &[&str]) -> Self {
        Self {
            tasks: ids.iter().map(|s| TaskId::new(*s)).collect(),
        }
    }
}

impl ReadinessProvider for FakeReadiness {
    fn ready_tasks(&self) -> Result<Vec<TaskId>, CoreError> {
        Ok(self.tasks.clone())
    }
}

#[derive(Debug, Default)]
struct FakeWorkspacesInner {
    workspaces: BTreeMap<TaskId, PathBuf>,
    diffs: BTreeMap<PathBuf, BTreeSet<String>>,
    fail_remove: HashSet<PathBuf>,
    removed: Vec<PathBuf>,
}

/// Workspace provider over an in-memory table of paths and diffs.
#[derive(Debug, Clone, Default)]
pub struct FakeWorkspaces {
    root: PathBuf,
    inner: Arc<Mutex<FakeWorkspacesInner>>,
}

impl FakeWorkspaces {
    /// New provider rooted at a virtual directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Arc::default(),
        }
    }

    /// Pre-register a workspace for a task.
    pub fn add_workspace(&self, task_id: &str) -> PathBuf {
        let path = self.root.join(task_id);
        self.inner
            .lock()
            .unwrap()
            .workspaces
            .insert(TaskId::new(task_id), path.clone());
        path
    }

    /// Set the changed-file set reported for a workspace path.
    pub fn set_diff(&self, path: &Path, files: &[&str]) {
        self.inner.lock().unwrap().diffs.insert(
            path.to_path_buf(),
            files.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Make `remove` fail for the given path.
    pub fn fail_remove_on(&self, path: &Path) {
        self.inner
            .lock()
            .unwrap()
            .fail_remove
            .insert(path.to_path_buf());
    }

    /// Paths removed so far, in order.
    pub fn removed(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().removed.clone()
    }
}

impl WorkspaceProvider for FakeWorkspaces {
    fn ensure(&self, task_id: &TaskId, _base_ref: &str) -> Result<PathBuf, CoreError> {
        let path = self.root.join(task_id.as_str());
        self.inner
            .lock()
            .unwrap()
            .workspaces
            .insert(task_id.clone(), path.clone());
        Ok(path)
    }

    fn remove(&self, path: &Path) -> Result<bool, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_remove.contains(path) {
            return Err(CoreError::provider("workspace remove", "injected failure"));
        }
        inner.removed.push(path.to_path_buf());
        let existed = inner.workspaces.values().any(|p| p == path);
        inner.workspaces.retain(|_, p| p != path);
        Ok(existed)
    }

    fn list(&self) -> Result<Vec<(TaskId, PathBuf)>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .workspaces
            .iter()
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect())
    }

    fn diff_from_base(&self, path: &Path) -> Result<BTreeSet<String>, CoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .diffs
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct FakeExecutorInner {
    next_pane: u32,
    launched: Vec<(TaskId, String, PathBuf)>,
    torn_down: Vec<String>,
    fail_launch: HashSet<TaskId>,
}

/// Executor that mints sequential pane handles and records hand-offs.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    inner: Arc<Mutex<FakeExecutorInner>>,
    oracle: Option<FakeOracle>,
}

impl FakeExecutor {
    /// New executor with no oracle wired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor whose provisioned panes are immediately live in `oracle`.
    pub fn with_oracle(oracle: FakeOracle) -> Self {
        Self {
            inner: Arc::default(),
            oracle: Some(oracle),
        }
    }

    /// Make `launch` fail for the given task.
    pub fn fail_launch_on(&self, task_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_launch
            .insert(TaskId::new(task_id));
    }

    /// Tasks handed off so far.
    pub fn launched(&self) -> Vec<(TaskId, String, PathBuf)> {
        self.inner.lock().unwrap().launched.clone()
    }

    /// Panes torn down so far.
    pub fn torn_down(&self) -> Vec<String> {
        self.inner.lock().unwrap().torn_down.clone()
    }
}

impl Executor for FakeExecutor {
    fn provision(&self, task_id: &TaskId) -> Result<WorkerHandle, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_pane += 1;
        let handle = WorkerHandle {
            pane: format!("%{}", inner.next_pane),
            window: format!("corral-{}", task_id),
        };
        drop(inner);
        if let Some(oracle) = &self.oracle {
            oracle.set_alive(&handle.pane, true);
        }
        Ok(handle)
    }

    fn launch(
        &self,
        task_id: &TaskId,
        handle: &WorkerHandle,
        workspace: &Path,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_launch.contains(task_id) {
            return Err(CoreError::provider("launch", "injected failure"));
        }
        inner
            .launched
            .push((task_id.clone(), handle.pane.clone(), workspace.to_path_buf()));
        Ok(())
    }

    fn teardown(&self, handle: &WorkerHandle) -> Result<(), CoreError> {
        self.inner
            .lock()
            .unwrap()
            .torn_down
            .push(handle.pane.clone());
        if let Some(oracle) = &self.oracle {
            oracle.set_alive(&handle.pane, false);
        }
        Ok(())
    }
}
