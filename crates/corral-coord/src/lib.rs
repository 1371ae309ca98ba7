//! Corral Coordination Core
//!
//! Coordinates independent worker processes claiming tasks on one machine
//! with nothing but the filesystem and a liveness oracle: file-backed
//! leases, a per-task lifecycle state machine, an append-only event log,
//! conflict detection, queue arbitration, and orphan reconciliation.
//!
//! There is no daemon and no in-process concurrency here: every operation
//! is one foreground pass, and the only mutex is the filesystem itself
//! (see [`fsatomic`]).

pub mod arbiter;
pub mod detector;
pub mod event_log;
pub mod fsatomic;
pub mod lease_store;
pub mod providers;
pub mod reconciler;
pub mod state_store;
pub mod testing;

// Re-export commonly used types
pub use arbiter::Arbiter;
pub use detector::detect;
pub use event_log::{EventFilter, EventLog};
pub use lease_store::{LeaseEntry, LeaseStore};
pub use providers::{Executor, LivenessOracle, ReadinessProvider, WorkerHandle, WorkspaceProvider};
pub use reconciler::{ReconcileOutcome, ReconcilePlan, Reconciler};
pub use state_store::StateStore;
