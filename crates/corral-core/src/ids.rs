//! Newtype wrapper for task identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a Task.
///
/// Task ids are opaque strings issued by the external task tracker;
/// Corral never generates or inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Deterministic filesystem-safe stem for files keyed by this id.
    ///
    /// Characters outside `[A-Za-z0-9._-]` map to `-`.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let id = TaskId::new("task-123");
        assert_eq!(format!("{}", id), "task-123");
    }

    #[test]
    fn test_id_from_str() {
        let id: TaskId = "bd-42".into();
        assert_eq!(id.as_str(), "bd-42");
    }

    #[test]
    fn test_file_stem_sanitizes() {
        let id = TaskId::new("feat/login page");
        assert_eq!(id.file_stem(), "feat-login-page");
    }
}
