//! Conflict detection between concurrently active tasks.

use crate::providers::WorkspaceProvider;
use corral_core::{ConflictReport, CoreError, TaskId};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Compute file overlaps between the given tasks' workspaces.
///
/// Asks the workspace provider for each task's changed-file set and reports
/// every overlapping pair. Read-only and deterministic; the report is never
/// persisted. Whether a non-empty report blocks scheduling is the
/// arbiter's policy, not decided here.
pub fn detect<W: WorkspaceProvider + ?Sized>(
    tasks: &BTreeMap<TaskId, PathBuf>,
    provider: &W,
) -> Result<ConflictReport, CoreError> {
    let mut changed = BTreeMap::new();
    for (task_id, path) in tasks {
        changed.insert(task_id.clone(), provider.diff_from_base(path)?);
    }
    Ok(ConflictReport::from_changed_files(&changed))
}
