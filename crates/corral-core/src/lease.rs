//! Lease records and their on-disk key=value format.

use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The authoritative claim record for one task.
///
/// A lease binds a task to a runtime liveness handle (a tmux pane id). The
/// file on disk is never trusted on its own: whether the lease is ACTIVE or
/// STALE is decided by asking the liveness oracle about `pane`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Task this lease claims.
    pub task_id: TaskId,

    /// Liveness handle (e.g. a tmux pane id such as `%12`).
    pub pane: String,

    /// Human-readable worker/window name.
    pub window: String,

    /// Agent/worker class that holds the claim.
    pub agent: String,

    /// When the claim was taken (UTC).
    pub claimed_at: DateTime<Utc>,
}

impl Lease {
    /// Create a new lease claimed now.
    pub fn new(
        task_id: TaskId,
        pane: impl Into<String>,
        window: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            pane: pane.into(),
            window: window.into(),
            agent: agent.into(),
            claimed_at: Utc::now(),
        }
    }

    /// Render the human-inspectable key=value file format.
    pub fn to_file_format(&self) -> String {
        format!(
            "id={}\npane={}\nwindow={}\nagent={}\nclaimed_at={}\n",
            self.task_id,
            self.pane,
            self.window,
            self.agent,
            self.claimed_at.to_rfc3339(),
        )
    }

    /// Parse the key=value file format.
    pub fn parse(input: &str) -> Result<Self, LeaseParseError> {
        let mut id = None;
        let mut pane = None;
        let mut window = None;
        let mut agent = None;
        let mut claimed_at = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| LeaseParseError::MalformedLine(line.to_string()))?;
            match key {
                "id" => id = Some(value.to_string()),
                "pane" => pane = Some(value.to_string()),
                "window" => window = Some(value.to_string()),
                "agent" => agent = Some(value.to_string()),
                "claimed_at" => claimed_at = Some(value.to_string()),
                // Unknown keys are tolerated for forward compatibility.
                _ => {}
            }
        }

        let claimed_at = claimed_at.ok_or(LeaseParseError::MissingField("claimed_at"))?;
        let claimed_at = DateTime::parse_from_rfc3339(&claimed_at)
            .map_err(|e| LeaseParseError::InvalidTimestamp(format!("{claimed_at}: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            task_id: TaskId::new(id.ok_or(LeaseParseError::MissingField("id"))?),
            pane: pane.ok_or(LeaseParseError::MissingField("pane"))?,
            window: window.ok_or(LeaseParseError::MissingField("window"))?,
            agent: agent.ok_or(LeaseParseError::MissingField("agent"))?,
            claimed_at,
        })
    }
}

/// Why a lease file failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseParseError {
    /// A line without a `key=value` shape.
    #[error("malformed line: {0:?}")]
    MalformedLine(String),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// `claimed_at` is not valid ISO 8601.
    #[error("invalid claimed_at timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Classification of a task's lease.
///
/// `Active`/`Stale` come only from the liveness oracle; `Corrupted` only
/// from a parse failure and carries the raw reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseClass {
    /// No lease file exists.
    Absent,
    /// Lease file exists and its pane is alive.
    Active,
    /// Lease file exists but its pane is gone; eligible to be stolen.
    Stale,
    /// Lease file exists but cannot be parsed.
    Corrupted {
        /// The raw parse error.
        reason: String,
    },
}

impl LeaseClass {
    /// Returns true if this classification permits a fresh claim.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Absent | Self::Stale)
    }
}

impl fmt::Display for LeaseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "ABSENT"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Stale => write!(f, "STALE"),
            Self::Corrupted { .. } => write!(f, "CORRUPTED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_round_trip() {
        let lease = Lease::new(TaskId::new("task-7"), "%12", "corral-task-7", "claude");
        let parsed = Lease::parse(&lease.to_file_format()).unwrap();
        assert_eq!(parsed.task_id, lease.task_id);
        assert_eq!(parsed.pane, "%12");
        assert_eq!(parsed.window, "corral-task-7");
        assert_eq!(parsed.agent, "claude");
        // RFC 3339 keeps sub-second precision, so timestamps survive intact.
        assert_eq!(parsed.claimed_at, lease.claimed_at);
    }

    #[test]
    fn test_parse_missing_field() {
        let err = Lease::parse("id=t1\npane=%0\n").unwrap_err();
        assert_eq!(err, LeaseParseError::MissingField("window"));
    }

    #[test]
    fn test_parse_bad_timestamp() {
        let input = "id=t1\npane=%0\nwindow=w\nagent=a\nclaimed_at=yesterday\n";
        assert!(matches!(
            Lease::parse(input).unwrap_err(),
            LeaseParseError::InvalidTimestamp(_)
        ));
    }

    #[test]
    fn test_parse_tolerates_unknown_keys() {
        let input =
            "id=t1\npane=%0\nwindow=w\nagent=a\nclaimed_at=2026-08-01T10:00:00Z\nextra=ignored\n";
        let lease = Lease::parse(input).unwrap();
        assert_eq!(lease.task_id.as_str(), "t1");
    }
}
