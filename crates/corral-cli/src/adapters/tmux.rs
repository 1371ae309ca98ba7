//! tmux adapters: pane liveness and worker pane provisioning.
//!
//! A lease's handle is a tmux pane id (`%N`). Pane existence is the ground
//! truth for lease liveness; a worker is provisioned as a detached window
//! whose single pane becomes the handle.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use corral_coord::{Executor, LivenessOracle, WorkerHandle};
use corral_core::{CoreError, TaskId};

/// Liveness oracle backed by `tmux list-panes -a`.
#[derive(Debug, Clone, Default)]
pub struct TmuxOracle;

impl TmuxOracle {
    /// New oracle for the default tmux server.
    pub fn new() -> Self {
        Self
    }
}

impl LivenessOracle for TmuxOracle {
    fn is_alive(&self, handle: &str) -> Result<bool, CoreError> {
        let output = Command::new("tmux")
            .args(["list-panes", "-a", "-F", "#{pane_id}"])
            .output()
            .map_err(|e| CoreError::provider("tmux list-panes", e))?;
        if !output.status.success() {
            // No tmux server means no live panes at all.
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| line.trim() == handle))
    }
}

/// Executor that runs each task's agent in its own tmux window.
#[derive(Debug, Clone)]
pub struct TmuxExecutor {
    agent_cmd: String,
}

impl TmuxExecutor {
    /// Executor launching `agent_cmd <task_id>` inside each claimed pane.
    pub fn new(agent_cmd: impl Into<String>) -> Self {
        Self {
            agent_cmd: agent_cmd.into(),
        }
    }
}

impl Executor for TmuxExecutor {
    fn provision(&self, task_id: &TaskId) -> Result<WorkerHandle, CoreError> {
        let window = format!("corral-{}", task_id.file_stem());
        let output = Command::new("tmux")
            .args(["new-window", "-d", "-P", "-F", "#{pane_id}", "-n", &window])
            .output()
            .map_err(|e| CoreError::provider("tmux new-window", e))?;
        if !output.status.success() {
            return Err(CoreError::provider(
                "tmux new-window",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let pane = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(task_id = %task_id, pane = %pane, window = %window, "worker pane provisioned");
        Ok(WorkerHandle { pane, window })
    }

    fn launch(
        &self,
        task_id: &TaskId,
        handle: &WorkerHandle,
        workspace: &Path,
    ) -> Result<(), CoreError> {
        let command = format!(
            "cd {} && {} {}",
            shell_quote(&workspace.display().to_string()),
            self.agent_cmd,
            shell_quote(task_id.as_str()),
        );
        let status = Command::new("tmux")
            .args(["send-keys", "-t", &handle.pane, &command, "Enter"])
            .status()
            .map_err(|e| CoreError::provider("tmux send-keys", e))?;
        if !status.success() {
            return Err(CoreError::provider(
                "tmux send-keys",
                format!("exit status {status}"),
            ));
        }
        Ok(())
    }

    fn teardown(&self, handle: &WorkerHandle) -> Result<(), CoreError> {
        let status = Command::new("tmux")
            .args(["kill-pane", "-t", &handle.pane])
            .status()
            .map_err(|e| CoreError::provider("tmux kill-pane", e))?;
        if !status.success() {
            return Err(CoreError::provider(
                "tmux kill-pane",
                format!("exit status {status}"),
            ));
        }
        Ok(())
    }
}

/// Single-quote a string for the shell line handed to `send-keys`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/tmp/ws"), "'/tmp/ws'");
    }

    #[test]
    fn test_shell_quote_embedded_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
