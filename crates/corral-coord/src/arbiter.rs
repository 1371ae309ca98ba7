//! Queue arbitration: plan which ready tasks to claim, then execute the
//! plan.
//!
//! Planning is a pure read-only pass over current lease state, the event
//! log, and workspace diffs: the same inputs always produce the same plan,
//! whether for a dry-run or the prelude of a real run. Execution walks the
//! selected tasks one by one; a failure for one task never aborts the rest.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use corral_core::{
    event, ClaimOutcome, CoordConfig, CoreError, EventRecord, ExecuteReport, LeaseClass, Plan,
    RollbackScope, SkipReason, StateRecord, TaskId, TaskState,
};

use crate::detector;
use crate::event_log::EventLog;
use crate::lease_store::LeaseStore;
use crate::providers::{Executor, LivenessOracle, WorkerHandle, WorkspaceProvider};
use crate::state_store::StateStore;

/// The scheduler: arbitrates ready candidates against leases, the dedup
/// window, and the conflict policy, then drives claims end to end.
///
/// Candidate order comes from the external tracker and is passed through
/// unchanged; the arbiter adds no priority of its own.
pub struct Arbiter<O, W, X> {
    leases: LeaseStore<O>,
    states: StateStore,
    events: EventLog,
    workspaces: W,
    executor: X,
    config: CoordConfig,
    agent: String,
}

impl<O, W, X> Arbiter<O, W, X>
where
    O: LivenessOracle,
    W: WorkspaceProvider,
    X: Executor,
{
    /// Assemble an arbiter from its parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leases: LeaseStore<O>,
        states: StateStore,
        events: EventLog,
        workspaces: W,
        executor: X,
        config: CoordConfig,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            leases,
            states,
            events,
            workspaces,
            executor,
            config,
            agent: agent.into(),
        }
    }

    /// Build a claim plan for the given candidates.
    ///
    /// Pure with respect to system state: only reads. For each candidate,
    /// in readiness order, while slots remain: an ACTIVE lease skips it, a
    /// STALE lease marks it for stealing, a successful claim inside the
    /// dedup window skips it (unless `override_dedup`), and a blocking
    /// file-overlap with an active or already-selected task skips it.
    /// Candidates beyond the concurrency bound are not evaluated at all:
    /// they appear in neither `selected` nor `skipped`.
    pub fn plan(
        &self,
        candidates: &[TaskId],
        now: DateTime<Utc>,
        override_dedup: bool,
    ) -> Result<Plan, CoreError> {
        let ttl = Duration::minutes(self.config.dedup_ttl_minutes);
        let mut plan = Plan::empty();

        let entries = self.leases.list_all()?;
        let mut classes: BTreeMap<TaskId, LeaseClass> = entries
            .iter()
            .map(|e| (e.task_id.clone(), e.class.clone()))
            .collect();
        let workspaces: BTreeMap<TaskId, PathBuf> = self.workspaces.list()?.into_iter().collect();

        let conflict_guard =
            self.config.conflict_detection_enabled && self.config.block_on_conflict;

        // Tasks whose changed files block overlapping candidates: every
        // ACTIVE task with a workspace, grown by each selection below.
        let mut blockers: BTreeMap<TaskId, PathBuf> = BTreeMap::new();
        if conflict_guard {
            for entry in &entries {
                if entry.class == LeaseClass::Active {
                    if let Some(path) = workspaces.get(&entry.task_id) {
                        blockers.insert(entry.task_id.clone(), path.clone());
                    }
                }
            }
        }

        for candidate in candidates {
            if plan.selected.len() >= self.config.max_workers {
                // Out of slots: remaining candidates are unreached, not skipped.
                break;
            }
            if plan.selected.contains(candidate) {
                // Duplicate candidate from the tracker.
                continue;
            }

            if let Some(path) = workspaces.get(candidate) {
                plan.workspace_paths.insert(candidate.clone(), path.clone());
            }

            let needs_steal = match classes.remove(candidate).unwrap_or(LeaseClass::Absent) {
                LeaseClass::Active => {
                    plan.skipped.push((candidate.clone(), SkipReason::AlreadyActive));
                    continue;
                }
                LeaseClass::Corrupted { reason } => {
                    warn!(task_id = %candidate, reason = %reason, "corrupted lease; not claiming over it");
                    plan.skipped.push((candidate.clone(), SkipReason::Corrupted));
                    continue;
                }
                LeaseClass::Stale => true,
                LeaseClass::Absent => false,
            };

            if !override_dedup
                && self
                    .events
                    .last_claim_within(candidate, ttl, now)?
                    .is_some()
            {
                plan.skipped.push((candidate.clone(), SkipReason::Deduplicated));
                continue;
            }

            if conflict_guard {
                if let Some(path) = workspaces.get(candidate) {
                    let mut probe = blockers.clone();
                    probe.insert(candidate.clone(), path.clone());
                    let report = detector::detect(&probe, &self.workspaces)?;
                    if report.involves(candidate) {
                        plan.skipped.push((candidate.clone(), SkipReason::Conflict));
                        continue;
                    }
                    blockers.insert(candidate.clone(), path.clone());
                }
            }

            if needs_steal {
                plan.touched_leases.push(candidate.clone());
            }
            plan.selected.push(candidate.clone());
        }

        debug!(
            selected = plan.selected.len(),
            skipped = plan.skipped.len(),
            "plan built"
        );
        Ok(plan)
    }

    /// Execute a plan: claim each selected task and hand it to the executor.
    ///
    /// Each task is processed independently; the report carries one outcome
    /// per selected task regardless of what happened to the others.
    pub fn execute(&self, plan: &Plan, base_ref: &str) -> Result<ExecuteReport, CoreError> {
        for (task_id, reason) in &plan.skipped {
            self.log_event(EventRecord::claim_skipped(
                task_id.clone(),
                reason.to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(plan.selected.len());
        for task_id in &plan.selected {
            let outcome = self.claim_one(task_id, plan.requires_steal(task_id), base_ref);
            outcomes.push((task_id.clone(), outcome));
        }
        Ok(ExecuteReport { outcomes })
    }

    fn claim_one(&self, task_id: &TaskId, steal: bool, base_ref: &str) -> ClaimOutcome {
        let handle = match self.executor.provision(task_id) {
            Ok(handle) => handle,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to provision worker");
                self.log_event(EventRecord::claim_failed(task_id.clone(), &e));
                return ClaimOutcome::Failed { error: e.to_string() };
            }
        };

        let claim = if steal {
            self.leases
                .steal(task_id, &handle.pane, &handle.window, &self.agent)
        } else {
            self.leases
                .acquire(task_id, &handle.pane, &handle.window, &self.agent)
        };
        let lease = match claim {
            Ok(lease) => lease,
            Err(e) if e.is_contention() => {
                info!(task_id = %task_id, reason = %e, "claim lost the race");
                self.teardown(&handle);
                self.log_event(EventRecord::claim_skipped(
                    task_id.clone(),
                    contention_reason(&e),
                ));
                return ClaimOutcome::Lost {
                    reason: contention_reason(&e).to_string(),
                };
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "claim failed");
                self.teardown(&handle);
                self.log_event(EventRecord::claim_failed(task_id.clone(), &e));
                return ClaimOutcome::Failed { error: e.to_string() };
            }
        };

        let workspace = match self.workspaces.ensure(task_id, base_ref) {
            Ok(path) => path,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "workspace setup failed");
                self.undo_claim(task_id, &handle);
                self.log_event(EventRecord::claim_failed(task_id.clone(), &e));
                return ClaimOutcome::Failed { error: e.to_string() };
            }
        };

        if let Err(e) = self
            .states
            .create_claimed(task_id, format!("claimed in {}", handle.window))
        {
            error!(task_id = %task_id, error = %e, "state record creation failed");
            self.undo_claim(task_id, &handle);
            self.log_event(EventRecord::claim_failed(task_id.clone(), &e));
            return ClaimOutcome::Failed { error: e.to_string() };
        }

        self.log_event(EventRecord::claim_ok(task_id.clone(), &lease.pane, steal));

        if let Err(e) = self.executor.launch(task_id, &handle, &workspace) {
            error!(task_id = %task_id, error = %e, "executor launch failed");
            if let Err(fail_err) = self.fail_task(task_id, format!("launch failed: {e}")) {
                warn!(task_id = %task_id, error = %fail_err, "could not mark task failed");
            }
            return ClaimOutcome::Failed { error: e.to_string() };
        }

        info!(
            task_id = %task_id,
            pane = %lease.pane,
            workspace = %workspace.display(),
            stolen = steal,
            "task claimed"
        );
        ClaimOutcome::Claimed {
            pane: lease.pane,
            workspace,
        }
    }

    /// Apply a lifecycle transition for a task that holds a lease.
    ///
    /// Rejected transitions mutate nothing; the attempt is still written to
    /// the event log, distinct from applied ones.
    pub fn transition(
        &self,
        task_id: &TaskId,
        to: TaskState,
        context: impl Into<String>,
    ) -> Result<StateRecord, CoreError> {
        if self.leases.classify(task_id)? == LeaseClass::Absent {
            return Err(CoreError::NoLease(task_id.to_string()));
        }

        match self.states.transition(task_id, to, context) {
            Ok(record) => {
                if let Some(applied) = record.history.last() {
                    self.log_event(EventRecord::transition_applied(
                        task_id.clone(),
                        applied.from.to_string(),
                        applied.to.to_string(),
                    ));
                }
                Ok(record)
            }
            Err(e) => {
                if let CoreError::InvalidTransition { from, to } = &e {
                    self.log_event(EventRecord::transition_rejected(
                        task_id.clone(),
                        from.clone(),
                        to.clone(),
                    ));
                }
                Err(e)
            }
        }
    }

    /// Mark a task completed and release its lease.
    pub fn complete_task(
        &self,
        task_id: &TaskId,
        context: impl Into<String>,
    ) -> Result<StateRecord, CoreError> {
        let record = self.transition(task_id, TaskState::Completed, context)?;
        self.release_after_terminal(task_id);
        Ok(record)
    }

    /// Mark a task failed, apply the rollback policy, release its lease.
    ///
    /// Rollback runs after the FAILED transition and its failures are
    /// logged without escalating: the task stays correctly marked failed
    /// even if cleanup cannot complete, and the reconciler is the backstop
    /// for whatever rollback left behind.
    pub fn fail_task(
        &self,
        task_id: &TaskId,
        context: impl Into<String>,
    ) -> Result<StateRecord, CoreError> {
        let prior = self.states.get_state(task_id)?;
        let record = self.transition(task_id, TaskState::Failed, context)?;

        if self.config.rollback_on_failure && self.rollback_applies(prior) {
            self.rollback_workspace(task_id);
        }
        self.release_after_terminal(task_id);
        Ok(record)
    }

    fn rollback_applies(&self, prior: TaskState) -> bool {
        match self.config.rollback_scope {
            RollbackScope::AnyFailure => true,
            RollbackScope::InProgressOnly => {
                matches!(prior, TaskState::InProgress | TaskState::Paused)
            }
        }
    }

    fn rollback_workspace(&self, task_id: &TaskId) {
        let path = match self.workspaces.list() {
            Ok(list) => list.into_iter().find(|(t, _)| t == task_id).map(|(_, p)| p),
            Err(e) => {
                error!(task_id = %task_id, error = %e, "rollback: workspace listing failed");
                self.log_event(
                    EventRecord::rollback(task_id.clone(), event::RESULT_ERROR)
                        .with_context("error", e.to_string()),
                );
                return;
            }
        };
        let Some(path) = path else {
            debug!(task_id = %task_id, "rollback: no workspace to remove");
            return;
        };
        match self.workspaces.remove(&path) {
            Ok(_) => {
                info!(task_id = %task_id, path = %path.display(), "workspace rolled back");
                self.log_event(
                    EventRecord::rollback(task_id.clone(), event::RESULT_OK)
                        .with_context("path", path.display().to_string()),
                );
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "rollback failed");
                self.log_event(
                    EventRecord::rollback(task_id.clone(), event::RESULT_ERROR)
                        .with_context("error", e.to_string()),
                );
            }
        }
    }

    fn release_after_terminal(&self, task_id: &TaskId) {
        match self.leases.release(task_id, true) {
            Ok(()) => self.log_event(EventRecord::release(task_id.clone(), true)),
            Err(e) => warn!(task_id = %task_id, error = %e, "lease release failed"),
        }
    }

    fn undo_claim(&self, task_id: &TaskId, handle: &WorkerHandle) {
        if let Err(e) = self.leases.release(task_id, true) {
            warn!(task_id = %task_id, error = %e, "could not undo claim");
        }
        self.teardown(handle);
    }

    fn teardown(&self, handle: &WorkerHandle) {
        if let Err(e) = self.executor.teardown(handle) {
            warn!(pane = %handle.pane, error = %e, "worker teardown failed");
        }
    }

    fn log_event(&self, record: EventRecord) {
        if let Err(e) = self.events.append(&record) {
            warn!(error = %e, "event log append failed");
        }
    }
}

fn contention_reason(err: &CoreError) -> &'static str {
    match err {
        CoreError::AlreadyActive { .. } => "already_active",
        CoreError::NotStale { .. } => "not_stale",
        CoreError::StillActive { .. } => "still_active",
        _ => "contention",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventFilter;
    use crate::providers::ReadinessProvider;
    use crate::testing::{FakeExecutor, FakeOracle, FakeReadiness, FakeWorkspaces};
    use tempfile::TempDir;

    struct Rig {
        arbiter: Arbiter<FakeOracle, FakeWorkspaces, FakeExecutor>,
        oracle: FakeOracle,
        workspaces: FakeWorkspaces,
        executor: FakeExecutor,
        _dir: TempDir,
    }

    fn rig(config: CoordConfig) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let oracle = FakeOracle::new();
        let workspaces = FakeWorkspaces::new(dir.path().join("ws"));
        let executor = FakeExecutor::with_oracle(oracle.clone());
        let arbiter = Arbiter::new(
            LeaseStore::open(dir.path().join("leases"), oracle.clone()).unwrap(),
            StateStore::open(dir.path().join("state")).unwrap(),
            EventLog::open(dir.path().join("events.log")).unwrap(),
            workspaces.clone(),
            executor.clone(),
            config,
            "claude",
        );
        Rig {
            arbiter,
            oracle,
            workspaces,
            executor,
            _dir: dir,
        }
    }

    fn ids(names: &[&str]) -> Vec<TaskId> {
        names.iter().map(|s| TaskId::new(*s)).collect()
    }

    #[test]
    fn test_plan_respects_concurrency_bound() {
        let rig = rig(CoordConfig {
            max_workers: 1,
            ..CoordConfig::default()
        });
        // T1 is actively leased; T2 is free; T3 is beyond the bound.
        rig.oracle.set_alive("%held", true);
        rig.arbiter
            .leases
            .acquire(&TaskId::new("t1"), "%held", "w", "claude")
            .unwrap();

        let plan = rig
            .arbiter
            .plan(&ids(&["t1", "t2", "t3"]), Utc::now(), false)
            .unwrap();

        assert_eq!(plan.selected, ids(&["t2"]));
        assert_eq!(plan.skipped, vec![(TaskId::new("t1"), SkipReason::AlreadyActive)]);
        // T3 was never reached: not selected, not skipped.
        assert!(!plan.selected.contains(&TaskId::new("t3")));
        assert!(!plan.skipped.iter().any(|(t, _)| t == &TaskId::new("t3")));
    }

    #[test]
    fn test_plan_is_pure() {
        let rig = rig(CoordConfig::default());
        rig.oracle.set_alive("%held", true);
        rig.arbiter
            .leases
            .acquire(&TaskId::new("t1"), "%held", "w", "claude")
            .unwrap();

        let now = Utc::now();
        let candidates = ids(&["t1", "t2", "t3"]);
        let first = rig.arbiter.plan(&candidates, now, false).unwrap();
        let second = rig.arbiter.plan(&candidates, now, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_dedup_window() {
        let rig = rig(CoordConfig {
            dedup_ttl_minutes: 5,
            ..CoordConfig::default()
        });
        let task = TaskId::new("t1");
        let t0 = Utc::now();

        let mut claim = EventRecord::claim_ok(task.clone(), "%1", false);
        claim.ts = t0;
        rig.arbiter.events.append(&claim).unwrap();

        let at_3m = rig
            .arbiter
            .plan(std::slice::from_ref(&task), t0 + Duration::minutes(3), false)
            .unwrap();
        assert_eq!(at_3m.skipped, vec![(task.clone(), SkipReason::Deduplicated)]);

        let at_6m = rig
            .arbiter
            .plan(std::slice::from_ref(&task), t0 + Duration::minutes(6), false)
            .unwrap();
        assert_eq!(at_6m.selected, vec![task.clone()]);

        let overridden = rig
            .arbiter
            .plan(std::slice::from_ref(&task), t0 + Duration::minutes(3), true)
            .unwrap();
        assert_eq!(overridden.selected, vec![task]);
    }

    #[test]
    fn test_plan_marks_stale_lease_for_steal() {
        let rig = rig(CoordConfig::default());
        // Lease held by a pane that is not alive.
        rig.arbiter
            .leases
            .acquire(&TaskId::new("t1"), "%gone", "w", "claude")
            .unwrap();

        let plan = rig.arbiter.plan(&ids(&["t1"]), Utc::now(), false).unwrap();
        assert_eq!(plan.selected, ids(&["t1"]));
        assert_eq!(plan.touched_leases, ids(&["t1"]));
    }

    #[test]
    fn test_plan_skips_corrupted_lease() {
        let rig = rig(CoordConfig::default());
        let path = rig.arbiter.leases.lease_path(&TaskId::new("t1"));
        std::fs::write(&path, "garbage").unwrap();

        let plan = rig.arbiter.plan(&ids(&["t1"]), Utc::now(), false).unwrap();
        assert!(plan.selected.is_empty());
        assert_eq!(plan.skipped, vec![(TaskId::new("t1"), SkipReason::Corrupted)]);
    }

    #[test]
    fn test_plan_conflict_with_active_task() {
        let rig = rig(CoordConfig::default());
        // Active task t1 touches src/lib.rs in its workspace.
        rig.oracle.set_alive("%1", true);
        rig.arbiter
            .leases
            .acquire(&TaskId::new("t1"), "%1", "w", "claude")
            .unwrap();
        let ws1 = rig.workspaces.add_workspace("t1");
        rig.workspaces.set_diff(&ws1, &["src/lib.rs"]);
        // Candidate t2 has an existing workspace touching the same file.
        let ws2 = rig.workspaces.add_workspace("t2");
        rig.workspaces.set_diff(&ws2, &["src/lib.rs", "README.md"]);

        let plan = rig.arbiter.plan(&ids(&["t2"]), Utc::now(), false).unwrap();
        assert_eq!(plan.skipped, vec![(TaskId::new("t2"), SkipReason::Conflict)]);
        assert_eq!(plan.workspace_paths.get(&TaskId::new("t2")), Some(&ws2));
    }

    #[test]
    fn test_plan_conflict_between_selected_candidates() {
        let rig = rig(CoordConfig::default());
        let ws1 = rig.workspaces.add_workspace("t1");
        rig.workspaces.set_diff(&ws1, &["shared.rs"]);
        let ws2 = rig.workspaces.add_workspace("t2");
        rig.workspaces.set_diff(&ws2, &["shared.rs"]);

        let plan = rig
            .arbiter
            .plan(&ids(&["t1", "t2"]), Utc::now(), false)
            .unwrap();
        assert_eq!(plan.selected, ids(&["t1"]));
        assert_eq!(plan.skipped, vec![(TaskId::new("t2"), SkipReason::Conflict)]);
    }

    #[test]
    fn test_plan_conflict_advisory_when_not_blocking() {
        let rig = rig(CoordConfig {
            block_on_conflict: false,
            ..CoordConfig::default()
        });
        let ws1 = rig.workspaces.add_workspace("t1");
        rig.workspaces.set_diff(&ws1, &["shared.rs"]);
        let ws2 = rig.workspaces.add_workspace("t2");
        rig.workspaces.set_diff(&ws2, &["shared.rs"]);

        let plan = rig
            .arbiter
            .plan(&ids(&["t1", "t2"]), Utc::now(), false)
            .unwrap();
        assert_eq!(plan.selected, ids(&["t1", "t2"]));
    }

    #[test]
    fn test_execute_claims_and_hands_off() {
        let rig = rig(CoordConfig::default());
        let ready = FakeReadiness::new(&["t1", "t2"]);
        let plan = rig
            .arbiter
            .plan(&ready.ready_tasks().unwrap(), Utc::now(), false)
            .unwrap();
        let report = rig.arbiter.execute(&plan, "main").unwrap();

        assert_eq!(report.claimed(), 2);
        assert!(!report.is_partial());
        assert_eq!(rig.executor.launched().len(), 2);
        assert_eq!(
            rig.arbiter.states.get_state(&TaskId::new("t1")).unwrap(),
            TaskState::Claimed
        );
        assert_eq!(
            rig.arbiter.leases.classify(&TaskId::new("t1")).unwrap(),
            LeaseClass::Active
        );

        let claims = rig
            .arbiter
            .events
            .query(
                &EventFilter::new()
                    .with_cmd("claim")
                    .with_result(event::RESULT_OK),
            )
            .unwrap();
        assert_eq!(claims.len(), 2);
    }

    #[test]
    fn test_execute_steals_stale_lease() {
        let rig = rig(CoordConfig::default());
        let task = TaskId::new("t1");
        rig.arbiter
            .leases
            .acquire(&task, "%crashed", "w0", "claude")
            .unwrap();

        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        assert!(plan.requires_steal(&task));

        let report = rig.arbiter.execute(&plan, "main").unwrap();
        assert_eq!(report.claimed(), 1);
        let lease = rig.arbiter.leases.get(&task).unwrap().unwrap();
        assert_ne!(lease.pane, "%crashed");
    }

    #[test]
    fn test_execute_isolates_per_task_failure() {
        let rig = rig(CoordConfig::default());
        rig.executor.fail_launch_on("t1");

        let plan = rig
            .arbiter
            .plan(&ids(&["t1", "t2"]), Utc::now(), false)
            .unwrap();
        let report = rig.arbiter.execute(&plan, "main").unwrap();

        assert_eq!(report.claimed(), 1);
        assert!(report.is_partial());
        assert!(matches!(
            report.outcomes[0].1,
            ClaimOutcome::Failed { .. }
        ));
        assert!(matches!(
            report.outcomes[1].1,
            ClaimOutcome::Claimed { .. }
        ));
        // The failed launch drove the task to FAILED.
        assert_eq!(
            rig.arbiter.states.get_state(&TaskId::new("t1")).unwrap(),
            TaskState::Failed
        );
    }

    #[test]
    fn test_invalid_transition_logged_not_applied() {
        let rig = rig(CoordConfig::default());
        let plan = rig.arbiter.plan(&ids(&["t1"]), Utc::now(), false).unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();
        let task = TaskId::new("t1");

        // CLAIMED -> PAUSED is not in the table.
        let err = rig
            .arbiter
            .transition(&task, TaskState::Paused, "nap")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(rig.arbiter.states.get_state(&task).unwrap(), TaskState::Claimed);

        let rejected = rig
            .arbiter
            .events
            .query(
                &EventFilter::new()
                    .with_cmd("transition")
                    .with_result(event::RESULT_INVALID),
            )
            .unwrap();
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_transition_requires_lease() {
        let rig = rig(CoordConfig::default());
        let err = rig
            .arbiter
            .transition(&TaskId::new("ghost"), TaskState::InProgress, "")
            .unwrap_err();
        assert!(matches!(err, CoreError::NoLease(_)));
    }

    #[test]
    fn test_fail_task_rolls_back_in_progress_work() {
        let rig = rig(CoordConfig::default());
        let task = TaskId::new("t1");
        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();
        rig.arbiter
            .transition(&task, TaskState::InProgress, "start")
            .unwrap();

        rig.arbiter.fail_task(&task, "agent crashed").unwrap();

        assert_eq!(rig.arbiter.states.get_state(&task).unwrap(), TaskState::Failed);
        assert_eq!(rig.workspaces.removed().len(), 1);
        assert_eq!(
            rig.arbiter.leases.classify(&task).unwrap(),
            LeaseClass::Absent
        );
        let rollbacks = rig
            .arbiter
            .events
            .query(&EventFilter::new().with_cmd("rollback"))
            .unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].result, event::RESULT_OK);
    }

    #[test]
    fn test_fail_from_claimed_skips_rollback_by_default() {
        let rig = rig(CoordConfig::default());
        let task = TaskId::new("t1");
        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();

        rig.arbiter.fail_task(&task, "never started").unwrap();

        assert_eq!(rig.arbiter.states.get_state(&task).unwrap(), TaskState::Failed);
        assert!(rig.workspaces.removed().is_empty());
    }

    #[test]
    fn test_fail_from_claimed_rolls_back_with_any_failure_scope() {
        let rig = rig(CoordConfig {
            rollback_scope: RollbackScope::AnyFailure,
            ..CoordConfig::default()
        });
        let task = TaskId::new("t1");
        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();

        rig.arbiter.fail_task(&task, "never started").unwrap();
        assert_eq!(rig.workspaces.removed().len(), 1);
    }

    #[test]
    fn test_rollback_failure_does_not_unfail_task() {
        let rig = rig(CoordConfig::default());
        let task = TaskId::new("t1");
        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();
        rig.arbiter
            .transition(&task, TaskState::InProgress, "start")
            .unwrap();
        let workspace = rig.workspaces.list().unwrap()[0].1.clone();
        rig.workspaces.fail_remove_on(&workspace);

        let record = rig.arbiter.fail_task(&task, "agent crashed").unwrap();

        assert_eq!(record.state, TaskState::Failed);
        let rollbacks = rig
            .arbiter
            .events
            .query(&EventFilter::new().with_cmd("rollback"))
            .unwrap();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].result, event::RESULT_ERROR);
    }

    #[test]
    fn test_complete_task_releases_lease() {
        let rig = rig(CoordConfig::default());
        let task = TaskId::new("t1");
        let plan = rig
            .arbiter
            .plan(std::slice::from_ref(&task), Utc::now(), false)
            .unwrap();
        rig.arbiter.execute(&plan, "main").unwrap();
        rig.arbiter
            .transition(&task, TaskState::InProgress, "start")
            .unwrap();

        rig.arbiter.complete_task(&task, "all tests pass").unwrap();

        assert_eq!(
            rig.arbiter.states.get_state(&task).unwrap(),
            TaskState::Completed
        );
        assert_eq!(
            rig.arbiter.leases.classify(&task).unwrap(),
            LeaseClass::Absent
        );
        // Completed work keeps its workspace.
        assert!(rig.workspaces.removed().is_empty());
    }
}
