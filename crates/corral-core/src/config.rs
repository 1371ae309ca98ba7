//! Coordination configuration.
//!
//! Configuration is built once (by the CLI) and threaded explicitly through
//! constructors; there are no ambient globals.

use serde::{Deserialize, Serialize};

/// Which FAILED transitions trigger a workspace rollback.
///
/// The rollback trigger is an explicit policy rather than a fixed behavior:
/// some deployments want a workspace discarded only once work actually
/// started, others on any failure including `CLAIMED -> FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Roll back only when the task had left CLAIMED (failed from
    /// IN_PROGRESS or PAUSED).
    InProgressOnly,
    /// Roll back on every FAILED transition, including from CLAIMED.
    AnyFailure,
}

/// Coordination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordConfig {
    /// Maximum concurrent claimed tasks per arbiter run.
    pub max_workers: usize,

    /// Window during which a previously claimed task is skipped (minutes).
    pub dedup_ttl_minutes: i64,

    /// Whether a file-overlap conflict blocks selection (vs. advisory only).
    pub block_on_conflict: bool,

    /// Whether to compute conflicts at all.
    pub conflict_detection_enabled: bool,

    /// Master switch for workspace rollback on failure.
    pub rollback_on_failure: bool,

    /// Which FAILED transitions trigger the rollback.
    pub rollback_scope: RollbackScope,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            dedup_ttl_minutes: 30,
            block_on_conflict: true,
            conflict_detection_enabled: true,
            rollback_on_failure: true,
            rollback_scope: RollbackScope::InProgressOnly,
        }
    }
}
