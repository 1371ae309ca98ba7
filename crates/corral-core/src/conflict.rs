//! File-overlap conflicts between concurrently active tasks.

use crate::ids::TaskId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Overlapping files between one pair of tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    /// First task of the pair (ordered, first < second).
    pub first: TaskId,

    /// Second task of the pair.
    pub second: TaskId,

    /// Files both tasks have changed relative to their base.
    pub files: BTreeSet<String>,
}

/// Ephemeral report of all pairwise overlaps; computed on demand, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    /// Conflicting pairs, ordered by task id for determinism.
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    /// Compute pairwise overlaps from per-task changed-file sets.
    ///
    /// Pure and deterministic: `BTreeMap` input order fixes the output order.
    pub fn from_changed_files(changed: &BTreeMap<TaskId, BTreeSet<String>>) -> Self {
        let tasks: Vec<_> = changed.keys().collect();
        let mut conflicts = Vec::new();

        for (i, first) in tasks.iter().enumerate() {
            for second in &tasks[i + 1..] {
                let overlap: BTreeSet<String> = changed[*first]
                    .intersection(&changed[*second])
                    .cloned()
                    .collect();
                if !overlap.is_empty() {
                    conflicts.push(Conflict {
                        first: (*first).clone(),
                        second: (*second).clone(),
                        files: overlap,
                    });
                }
            }
        }

        Self { conflicts }
    }

    /// True if no pair overlaps.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// True if the given task is part of any conflicting pair.
    pub fn involves(&self, task_id: &TaskId) -> bool {
        self.conflicts
            .iter()
            .any(|c| &c.first == task_id || &c.second == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overlapping_pair_reported() {
        let mut changed = BTreeMap::new();
        changed.insert(TaskId::new("a"), files(&["src/lib.rs", "src/main.rs"]));
        changed.insert(TaskId::new("b"), files(&["src/main.rs", "README.md"]));
        changed.insert(TaskId::new("c"), files(&["docs/guide.md"]));

        let report = ConflictReport::from_changed_files(&changed);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].first, TaskId::new("a"));
        assert_eq!(report.conflicts[0].second, TaskId::new("b"));
        assert_eq!(report.conflicts[0].files, files(&["src/main.rs"]));
        assert!(report.involves(&TaskId::new("a")));
        assert!(!report.involves(&TaskId::new("c")));
    }

    #[test]
    fn test_disjoint_tasks_no_conflict() {
        let mut changed = BTreeMap::new();
        changed.insert(TaskId::new("a"), files(&["one.rs"]));
        changed.insert(TaskId::new("b"), files(&["two.rs"]));

        assert!(ConflictReport::from_changed_files(&changed).is_empty());
    }

    #[test]
    fn test_deterministic_output() {
        let mut changed = BTreeMap::new();
        changed.insert(TaskId::new("x"), files(&["f"]));
        changed.insert(TaskId::new("y"), files(&["f"]));
        changed.insert(TaskId::new("z"), files(&["f"]));

        let a = ConflictReport::from_changed_files(&changed);
        let b = ConflictReport::from_changed_files(&changed);
        assert_eq!(a, b);
        assert_eq!(a.conflicts.len(), 3);
    }
}
