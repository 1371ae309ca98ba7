//! Corral CLI - claim, run, and release tasks coordinated through the
//! filesystem.
//!
//! Every invocation is a single foreground pass; concurrent invocations
//! from other shells, scripts, or cron entries are serialized by the lease
//! store's atomic filesystem operations, not by any daemon.
//!
//! Exit codes are stable for scripting: 0 full success, 1 failure,
//! 3 partial success (some of N items done).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use corral_coord::{
    Arbiter, EventFilter, EventLog, LeaseStore, ReadinessProvider, Reconciler, StateStore,
};
use corral_core::{
    ClaimOutcome, CoordConfig, CoreError, EventRecord, ExecuteReport, Plan, RollbackScope, TaskId,
    TaskState,
};

mod adapters;

use adapters::{CommandReadiness, GitWorkspaces, TmuxExecutor, TmuxOracle};

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_PARTIAL: u8 = 3;

/// Corral - coordinate agent workers claiming tasks on one machine
#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Filesystem-coordinated task claiming for agent workers", long_about = None)]
struct Cli {
    /// Coordination state directory (leases, state records, event log)
    #[arg(long, global = true, default_value = ".corral")]
    dir: PathBuf,

    /// Agent name recorded on claimed leases
    #[arg(long, global = true, default_value = "claude")]
    agent: String,

    #[command(subcommand)]
    command: Commands,
}

/// Rollback policy flags shared by `claim` and `fail`.
#[derive(Args)]
struct PolicyOpts {
    /// Disable workspace rollback on failure
    #[arg(long)]
    no_rollback: bool,

    /// Roll back on any FAILED transition, including from CLAIMED
    #[arg(long)]
    rollback_any_failure: bool,
}

/// Workspace location flags shared by workspace-touching commands.
#[derive(Args)]
struct WorkspaceOpts {
    /// Repository whose worktrees back the workspaces
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Directory holding per-task workspaces (default: <dir>/workspaces)
    #[arg(long)]
    workspaces: Option<PathBuf>,
}

impl WorkspaceOpts {
    fn root(&self, dir: &Path) -> PathBuf {
        self.workspaces
            .clone()
            .unwrap_or_else(|| dir.join("workspaces"))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and claim ready tasks, spawning a worker pane per claim
    Claim {
        /// Explicit candidate task ids, in order (bypasses --ready-cmd)
        tasks: Vec<String>,

        /// Command printing ready task ids, one per line, in order
        #[arg(long)]
        ready_cmd: Option<String>,

        /// Maximum tasks to claim in this pass
        #[arg(long, default_value_t = 4)]
        max_workers: usize,

        /// Skip tasks successfully claimed within this many minutes
        #[arg(long, default_value_t = 30)]
        dedup_ttl_minutes: i64,

        /// Claim even inside the dedup window
        #[arg(long)]
        override_dedup: bool,

        /// Print the plan and stop; no side effects
        #[arg(long)]
        dry_run: bool,

        /// Base ref new workspaces start from
        #[arg(long, default_value = "main")]
        base_ref: String,

        /// Report file conflicts without blocking selection
        #[arg(long)]
        advisory_conflicts: bool,

        /// Skip conflict detection entirely
        #[arg(long)]
        no_conflict_detection: bool,

        /// Command launched in each claimed pane, given the task id
        #[arg(long, default_value = "claude")]
        agent_cmd: String,

        #[command(flatten)]
        policy: PolicyOpts,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// List every lease with its classification
    Leases,

    /// Release a task's lease
    Release {
        /// Task id
        task: String,

        /// Release even if the lease is active or corrupted
        #[arg(long)]
        force: bool,
    },

    /// Mark a claimed task as started
    Start {
        /// Task id
        task: String,

        /// Context recorded with the transition
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Pause an in-progress task
    Pause {
        /// Task id
        task: String,

        /// Context recorded with the transition
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Resume a paused task
    Resume {
        /// Task id
        task: String,

        /// Context recorded with the transition
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Mark a task completed and release its lease
    Complete {
        /// Task id
        task: String,

        /// Context recorded with the transition
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Mark a task failed, applying the rollback policy
    Fail {
        /// Task id
        task: String,

        /// Context recorded with the transition
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        policy: PolicyOpts,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Show a task's lifecycle state and history
    State {
        /// Task id
        task: String,
    },

    /// Find orphaned leases and workspaces; remove them with --apply
    Reconcile {
        /// Remove what the survey finds
        #[arg(long)]
        apply: bool,

        /// Also remove corrupted lease files
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        workspace: WorkspaceOpts,
    },

    /// Query the event log
    Events {
        /// Filter by task id
        #[arg(long)]
        task: Option<String>,

        /// Filter by command name
        #[arg(long)]
        cmd: Option<String>,

        /// Filter by result (ok, skipped, invalid, error)
        #[arg(long)]
        result: Option<String>,

        /// Only events at or after this RFC 3339 instant
        #[arg(long)]
        since: Option<String>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<u8, CoreError> {
    let dir = cli.dir;
    let agent = cli.agent;

    match cli.command {
        Commands::Claim {
            tasks,
            ready_cmd,
            max_workers,
            dedup_ttl_minutes,
            override_dedup,
            dry_run,
            base_ref,
            advisory_conflicts,
            no_conflict_detection,
            agent_cmd,
            policy,
            workspace,
        } => {
            let candidates: Vec<TaskId> = if !tasks.is_empty() {
                tasks.into_iter().map(TaskId::from).collect()
            } else if let Some(cmd) = ready_cmd {
                CommandReadiness::new(cmd).ready_tasks()?
            } else {
                eprintln!("error: give task ids or --ready-cmd");
                return Ok(EXIT_FAILURE);
            };

            let config = CoordConfig {
                max_workers,
                dedup_ttl_minutes,
                block_on_conflict: !advisory_conflicts,
                conflict_detection_enabled: !no_conflict_detection,
                rollback_on_failure: !policy.no_rollback,
                rollback_scope: rollback_scope(&policy),
            };

            let arbiter = arbiter(&dir, &agent, config, &agent_cmd, &workspace)?;
            let plan = arbiter.plan(&candidates, Utc::now(), override_dedup)?;
            print_plan(&plan);

            if dry_run {
                return Ok(EXIT_OK);
            }

            let report = arbiter.execute(&plan, &base_ref)?;
            print_report(&report);
            Ok(if report.claimed() == report.outcomes.len() {
                EXIT_OK
            } else if report.claimed() > 0 {
                EXIT_PARTIAL
            } else {
                EXIT_FAILURE
            })
        }

        Commands::Leases => {
            let entries = lease_store(&dir)?.list_all()?;
            println!(
                "{:<24}  {:<10}  {:<8}  {:<20}  {}",
                "TASK", "CLASS", "PANE", "CLAIMED", "AGENT"
            );
            println!("{}", "-".repeat(78));
            for entry in entries {
                match &entry.lease {
                    Some(lease) => println!(
                        "{:<24}  {:<10}  {:<8}  {:<20}  {}",
                        entry.task_id.to_string(),
                        entry.class.to_string(),
                        lease.pane,
                        lease.claimed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        lease.agent,
                    ),
                    None => println!(
                        "{:<24}  {:<10}  {}",
                        entry.task_id.to_string(),
                        entry.class.to_string(),
                        entry.path.display(),
                    ),
                }
            }
            Ok(EXIT_OK)
        }

        Commands::Release { task, force } => {
            let task_id = TaskId::new(task);
            lease_store(&dir)?.release(&task_id, force)?;
            log_event(&dir, EventRecord::release(task_id.clone(), force));
            println!("released {task_id}");
            Ok(EXIT_OK)
        }

        Commands::Start {
            task,
            context,
            workspace,
        } => lifecycle(&dir, &agent, &workspace, &task, TaskState::InProgress, context),

        Commands::Pause {
            task,
            context,
            workspace,
        } => lifecycle(&dir, &agent, &workspace, &task, TaskState::Paused, context),

        Commands::Resume {
            task,
            context,
            workspace,
        } => lifecycle(&dir, &agent, &workspace, &task, TaskState::InProgress, context),

        Commands::Complete {
            task,
            context,
            workspace,
        } => {
            let arbiter = arbiter(&dir, &agent, CoordConfig::default(), "claude", &workspace)?;
            let task_id = TaskId::new(task);
            let record =
                arbiter.complete_task(&task_id, context.unwrap_or_else(|| "completed".into()))?;
            println!("{task_id}: {}", record.state);
            Ok(EXIT_OK)
        }

        Commands::Fail {
            task,
            context,
            policy,
            workspace,
        } => {
            let config = CoordConfig {
                rollback_on_failure: !policy.no_rollback,
                rollback_scope: rollback_scope(&policy),
                ..CoordConfig::default()
            };
            let arbiter = arbiter(&dir, &agent, config, "claude", &workspace)?;
            let task_id = TaskId::new(task);
            let record =
                arbiter.fail_task(&task_id, context.unwrap_or_else(|| "failed".into()))?;
            println!("{task_id}: {}", record.state);
            Ok(EXIT_OK)
        }

        Commands::State { task } => {
            let task_id = TaskId::new(task);
            let record = state_store(&dir)?
                .load(&task_id)?
                .ok_or_else(|| CoreError::NoStateRecord(task_id.to_string()))?;
            println!("{task_id}: {}", record.state);
            for transition in &record.history {
                println!(
                    "  {:<12} -> {:<12}  {}  {}",
                    transition.from.to_string(),
                    transition.to.to_string(),
                    transition.at.format("%Y-%m-%d %H:%M:%S"),
                    transition.context,
                );
            }
            Ok(EXIT_OK)
        }

        Commands::Reconcile {
            apply,
            force,
            workspace,
        } => {
            let reconciler = Reconciler::new(
                lease_store(&dir)?,
                GitWorkspaces::new(&workspace.repo, workspace.root(&dir)),
                event_log(&dir)?,
            );
            let plan = reconciler.plan()?;

            for task_id in &plan.stale_leases {
                println!("stale lease       {task_id}");
            }
            for (task_id, reason) in &plan.corrupted_leases {
                println!("corrupted lease   {task_id}  ({reason})");
            }
            for (task_id, path) in &plan.untracked_workspaces {
                println!("orphan workspace  {task_id}  {}", path.display());
            }

            if plan.is_empty() {
                println!("nothing to reconcile");
                return Ok(EXIT_OK);
            }
            if !apply {
                println!("run again with --apply to remove");
                return Ok(EXIT_OK);
            }

            let outcome = reconciler.apply(&plan, force);
            for item in &outcome.removed {
                println!("removed {item}");
            }
            for (item, error) in &outcome.failed {
                println!("failed  {item}: {error}");
            }
            Ok(if outcome.failed.is_empty() {
                EXIT_OK
            } else if outcome.removed.is_empty() {
                EXIT_FAILURE
            } else {
                EXIT_PARTIAL
            })
        }

        Commands::Events {
            task,
            cmd,
            result,
            since,
        } => {
            let mut filter = EventFilter::new();
            if let Some(task) = task {
                filter = filter.with_task(TaskId::new(task));
            }
            if let Some(cmd) = cmd {
                filter = filter.with_cmd(cmd);
            }
            if let Some(result) = result {
                filter = filter.with_result(result);
            }
            if let Some(since) = since {
                let since = DateTime::parse_from_rfc3339(&since)
                    .map_err(|e| CoreError::Serialization(format!("invalid --since: {e}")))?
                    .with_timezone(&Utc);
                filter = filter.with_since(since);
            }

            for record in event_log(&dir)?.query(&filter)? {
                let line = serde_json::to_string(&record)
                    .map_err(|e| CoreError::Serialization(e.to_string()))?;
                println!("{line}");
            }
            Ok(EXIT_OK)
        }
    }
}

fn lifecycle(
    dir: &Path,
    agent: &str,
    workspace: &WorkspaceOpts,
    task: &str,
    to: TaskState,
    context: Option<String>,
) -> Result<u8, CoreError> {
    let arbiter = arbiter(dir, agent, CoordConfig::default(), "claude", workspace)?;
    let task_id = TaskId::new(task);
    let record = arbiter.transition(&task_id, to, context.unwrap_or_default())?;
    println!("{task_id}: {}", record.state);
    Ok(EXIT_OK)
}

fn rollback_scope(policy: &PolicyOpts) -> RollbackScope {
    if policy.rollback_any_failure {
        RollbackScope::AnyFailure
    } else {
        RollbackScope::InProgressOnly
    }
}

fn lease_store(dir: &Path) -> Result<LeaseStore<TmuxOracle>, CoreError> {
    LeaseStore::open(dir.join("leases"), TmuxOracle::new())
}

fn state_store(dir: &Path) -> Result<StateStore, CoreError> {
    StateStore::open(dir.join("state"))
}

fn event_log(dir: &Path) -> Result<EventLog, CoreError> {
    EventLog::open(dir.join("events.log"))
}

fn arbiter(
    dir: &Path,
    agent: &str,
    config: CoordConfig,
    agent_cmd: &str,
    workspace: &WorkspaceOpts,
) -> Result<Arbiter<TmuxOracle, GitWorkspaces, TmuxExecutor>, CoreError> {
    Ok(Arbiter::new(
        lease_store(dir)?,
        state_store(dir)?,
        event_log(dir)?,
        GitWorkspaces::new(&workspace.repo, workspace.root(dir)),
        TmuxExecutor::new(agent_cmd),
        config,
        agent,
    ))
}

fn log_event(dir: &Path, record: EventRecord) {
    match event_log(dir) {
        Ok(log) => {
            if let Err(e) = log.append(&record) {
                warn!(error = %e, "event log append failed");
            }
        }
        Err(e) => warn!(error = %e, "event log open failed"),
    }
}

fn print_plan(plan: &Plan) {
    println!(
        "plan: {} selected, {} skipped",
        plan.selected.len(),
        plan.skipped.len()
    );
    for task_id in &plan.selected {
        let steal = if plan.requires_steal(task_id) {
            "  (steal)"
        } else {
            ""
        };
        println!("  select  {task_id}{steal}");
    }
    for (task_id, reason) in &plan.skipped {
        println!("  skip    {task_id}  {reason}");
    }
}

fn print_report(report: &ExecuteReport) {
    for (task_id, outcome) in &report.outcomes {
        match outcome {
            ClaimOutcome::Claimed { pane, workspace } => {
                println!("claimed {task_id}  pane={pane}  workspace={}", workspace.display());
            }
            ClaimOutcome::Lost { reason } => {
                println!("lost    {task_id}  {reason}");
            }
            ClaimOutcome::Failed { error } => {
                println!("failed  {task_id}  {error}");
            }
        }
    }
}
