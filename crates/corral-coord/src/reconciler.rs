//! Orphan reconciliation.
//!
//! A caller killed mid-claim leaves a lease and/or workspace behind by
//! design; nothing tries to prevent that. This pass finds the debris —
//! stale leases, corrupted lease files, workspaces with no lease of any
//! classification — and removes it on request. Every removal is attempted
//! independently: one failure never stops the rest.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{info, warn};

use corral_core::{event, CoreError, EventRecord, LeaseClass, TaskId};

use crate::event_log::EventLog;
use crate::lease_store::LeaseStore;
use crate::providers::{LivenessOracle, WorkspaceProvider};

/// What a reconciliation pass would remove.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    /// Leases whose handle the oracle reports dead.
    pub stale_leases: Vec<TaskId>,

    /// Unparseable lease files, with the parse error. Removal requires
    /// force.
    pub corrupted_leases: Vec<(TaskId, String)>,

    /// Workspaces on disk with no lease of any classification.
    pub untracked_workspaces: Vec<(TaskId, PathBuf)>,
}

impl ReconcilePlan {
    /// True when there is nothing to repair.
    pub fn is_empty(&self) -> bool {
        self.stale_leases.is_empty()
            && self.corrupted_leases.is_empty()
            && self.untracked_workspaces.is_empty()
    }
}

/// Per-item results of applying a reconcile plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileOutcome {
    /// Items removed, labeled `lease:<task>` or `workspace:<path>`.
    pub removed: Vec<String>,

    /// Items that could not be removed, with the error.
    pub failed: Vec<(String, String)>,
}

/// Finds and repairs inconsistencies between leases and workspaces.
pub struct Reconciler<O, W> {
    leases: LeaseStore<O>,
    workspaces: W,
    events: EventLog,
}

impl<O, W> Reconciler<O, W>
where
    O: LivenessOracle,
    W: WorkspaceProvider,
{
    /// Assemble a reconciler from its parts.
    pub fn new(leases: LeaseStore<O>, workspaces: W, events: EventLog) -> Self {
        Self {
            leases,
            workspaces,
            events,
        }
    }

    /// Survey current orphans without touching anything.
    pub fn plan(&self) -> Result<ReconcilePlan, CoreError> {
        let entries = self.leases.list_all()?;
        let tracked: BTreeSet<TaskId> = entries.iter().map(|e| e.task_id.clone()).collect();

        let mut plan = ReconcilePlan {
            stale_leases: Vec::new(),
            corrupted_leases: Vec::new(),
            untracked_workspaces: Vec::new(),
        };

        for entry in entries {
            match entry.class {
                LeaseClass::Stale => plan.stale_leases.push(entry.task_id),
                LeaseClass::Corrupted { reason } => {
                    plan.corrupted_leases.push((entry.task_id, reason))
                }
                _ => {}
            }
        }

        for (task_id, path) in self.workspaces.list()? {
            if !tracked.contains(&task_id) {
                plan.untracked_workspaces.push((task_id, path));
            }
        }

        Ok(plan)
    }

    /// Remove everything in the plan, one item at a time.
    ///
    /// Stale leases are released without force, so one that was re-claimed
    /// between plan and apply fails safe instead of being deleted.
    /// Corrupted leases are only removed under `force`.
    pub fn apply(&self, plan: &ReconcilePlan, force: bool) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for task_id in &plan.stale_leases {
            let label = format!("lease:{task_id}");
            match self.leases.release(task_id, false) {
                Ok(()) => self.record_removed(&mut outcome, label),
                Err(e) => self.record_failed(&mut outcome, label, e),
            }
        }

        for (task_id, _reason) in &plan.corrupted_leases {
            let label = format!("lease:{task_id}");
            if !force {
                self.record_failed(
                    &mut outcome,
                    label,
                    CoreError::provider("reconcile", "corrupted lease requires force"),
                );
                continue;
            }
            match self.leases.release(task_id, true) {
                Ok(()) => self.record_removed(&mut outcome, label),
                Err(e) => self.record_failed(&mut outcome, label, e),
            }
        }

        for (_, path) in &plan.untracked_workspaces {
            let label = format!("workspace:{}", path.display());
            match self.workspaces.remove(path) {
                Ok(_) => self.record_removed(&mut outcome, label),
                Err(e) => self.record_failed(&mut outcome, label, e),
            }
        }

        outcome
    }

    fn record_removed(&self, outcome: &mut ReconcileOutcome, label: String) {
        info!(item = %label, "orphan removed");
        self.log_event(EventRecord::reconcile(&label, event::RESULT_OK));
        outcome.removed.push(label);
    }

    fn record_failed(&self, outcome: &mut ReconcileOutcome, label: String, err: CoreError) {
        warn!(item = %label, error = %err, "orphan removal failed");
        self.log_event(
            EventRecord::reconcile(&label, event::RESULT_ERROR)
                .with_context("error", err.to_string()),
        );
        outcome.failed.push((label, err.to_string()));
    }

    fn log_event(&self, record: EventRecord) {
        if let Err(e) = self.events.append(&record) {
            warn!(error = %e, "event log append failed");
        }
    }
}
