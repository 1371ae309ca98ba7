//! Git worktree workspace provider.
//!
//! One detached worktree per task under a common root, branched from the
//! configured base ref. The diff against base is everything `git status`
//! reports in the worktree, since the worktree starts exactly at base.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use corral_coord::WorkspaceProvider;
use corral_core::{CoreError, TaskId};

/// Workspaces as git worktrees of one repository.
#[derive(Debug, Clone)]
pub struct GitWorkspaces {
    repo: PathBuf,
    root: PathBuf,
}

impl GitWorkspaces {
    /// Provider over `repo`, storing worktrees under `root`.
    pub fn new(repo: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            root: root.into(),
        }
    }

    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String, CoreError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(args)
            .output()
            .map_err(|e| CoreError::provider(format!("git {}", args[0]), e))?;
        if !output.status.success() {
            return Err(CoreError::provider(
                format!("git {}", args[0]),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WorkspaceProvider for GitWorkspaces {
    fn ensure(&self, task_id: &TaskId, base_ref: &str) -> Result<PathBuf, CoreError> {
        let path = self.root.join(task_id.file_stem());
        if path.exists() {
            debug!(task_id = %task_id, path = %path.display(), "reusing workspace");
            return Ok(path);
        }
        fs::create_dir_all(&self.root)?;
        let path_str = path.display().to_string();
        self.run_git(
            &self.repo,
            &["worktree", "add", "--detach", &path_str, base_ref],
        )?;
        debug!(task_id = %task_id, path = %path_str, base_ref, "workspace created");
        Ok(path)
    }

    fn remove(&self, path: &Path) -> Result<bool, CoreError> {
        if !path.exists() {
            return Ok(false);
        }
        let path_str = path.display().to_string();
        self.run_git(&self.repo, &["worktree", "remove", "--force", &path_str])?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<(TaskId, PathBuf)>, CoreError> {
        let mut workspaces = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(workspaces),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                workspaces.push((TaskId::new(name), entry.path()));
            }
        }
        workspaces.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(workspaces)
    }

    fn diff_from_base(&self, path: &Path) -> Result<BTreeSet<String>, CoreError> {
        let stdout = self.run_git(path, &["status", "--porcelain"])?;
        let mut files = BTreeSet::new();
        for line in stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            // Porcelain v1: two status columns, a space, then the path;
            // renames read `old -> new` and the new path is the one in play.
            let file = &line[3..];
            let file = file.rsplit(" -> ").next().unwrap_or(file);
            files.insert(file.trim_matches('"').to_string());
        }
        Ok(files)
    }
}
