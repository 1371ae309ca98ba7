//! Concrete providers: tmux for liveness and workers, git for workspaces,
//! an external command for readiness.

pub mod git;
pub mod ready;
pub mod tmux;

pub use git::GitWorkspaces;
pub use ready::CommandReadiness;
pub use tmux::{TmuxExecutor, TmuxOracle};
