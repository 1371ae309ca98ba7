//! Corral Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The filesystem
//! - Process spawning (tmux, git)
//! - Any async runtime
//!
//! All types here represent the coordination domain of Corral: leases,
//! task lifecycle states, events, claim plans, and conflicts.

pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod ids;
pub mod lease;
pub mod plan;
pub mod state;

// Re-export commonly used types
pub use config::{CoordConfig, RollbackScope};
pub use conflict::{Conflict, ConflictReport};
pub use error::CoreError;
pub use event::EventRecord;
pub use ids::TaskId;
pub use lease::{Lease, LeaseClass, LeaseParseError};
pub use plan::{ClaimOutcome, ExecuteReport, Plan, SkipReason};
pub use state::{StateRecord, StateTransition, TaskState};
