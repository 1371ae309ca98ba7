//! Core domain errors.

use std::path::PathBuf;
use thiserror::Error;

/// Core domain errors for Corral.
///
/// Contention variants (`AlreadyActive`, `NotStale`, `StillActive`) are
/// expected control flow for racing claimers; callers move on to the next
/// candidate. The remaining variants are genuine failures and carry enough
/// context to be surfaced and logged.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A live lease already exists for the task.
    #[error("Lease already active for task: {task_id}")]
    AlreadyActive { task_id: String },

    /// Steal attempted on a lease that is not stale.
    #[error("Lease for task '{task_id}' is not stale")]
    NotStale { task_id: String },

    /// Release refused because the lease is still active.
    #[error("Lease for task '{task_id}' is still active; pass force to release it")]
    StillActive { task_id: String },

    /// Lease file exists but cannot be parsed.
    #[error("Corrupted lease at {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No state record exists for the task.
    #[error("No state record for task: {0}")]
    NoStateRecord(String),

    /// State mutation attempted without a lease on the task.
    #[error("No lease held for task: {0}")]
    NoLease(String),

    /// An external provider call failed.
    #[error("Provider failure during {op}: {message}")]
    ProviderFailure { op: String, message: String },

    /// I/O error from the backing filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Wrap an external provider error with the operation that failed.
    pub fn provider(op: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::ProviderFailure {
            op: op.into(),
            message: err.to_string(),
        }
    }

    /// True for contention outcomes that are expected under racing claimers.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive { .. } | Self::NotStale { .. } | Self::StillActive { .. }
        )
    }
}
