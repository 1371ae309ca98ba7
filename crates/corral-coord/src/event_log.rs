//! Append-only audit log.
//!
//! One JSON object per line, appended with O_APPEND semantics so
//! independent processes never tear each other's records. The log is never
//! compacted, rotated, or rewritten; it backs the dedup guard and
//! post-mortem queries.

use crate::fsatomic;
use chrono::{DateTime, Duration, Utc};
use corral_core::{event, CoreError, EventRecord, TaskId};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Append-only event log at a fixed path.
pub struct EventLog {
    path: PathBuf,
}

/// Read-side filter for [`EventLog::query`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Match this command name.
    pub cmd: Option<String>,

    /// Match this task.
    pub task: Option<TaskId>,

    /// Match this result string.
    pub result: Option<String>,

    /// Only records at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// An empty filter matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to match a command.
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    /// Builder method to match a task.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task = Some(task_id);
        self
    }

    /// Builder method to match a result.
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Builder method to bound the scan in time.
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    fn matches(&self, record: &EventRecord) -> bool {
        if let Some(cmd) = &self.cmd {
            if &record.cmd != cmd {
                return false;
            }
        }
        if let Some(task) = &self.task {
            if record.task.as_ref() != Some(task) {
                return false;
            }
        }
        if let Some(result) = &self.result {
            if &record.result != result {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.ts < since {
                return false;
            }
        }
        true
    }
}

impl EventLog {
    /// Open the log at `path`, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Append one record. This is the only mutation the log supports.
    pub fn append(&self, record: &EventRecord) -> Result<(), CoreError> {
        let line =
            serde_json::to_string(record).map_err(|e| CoreError::Serialization(e.to_string()))?;
        fsatomic::append_line(&self.path, &line)?;
        Ok(())
    }

    /// Scan the log, returning matching records in file order.
    ///
    /// Malformed lines are warned about and skipped; they never abort the
    /// scan. A missing log file is an empty log.
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, CoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(line) {
                Ok(record) => {
                    if filter.matches(&record) {
                        records.push(record);
                    }
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %e,
                        "skipping malformed event log line"
                    );
                }
            }
        }
        Ok(records)
    }

    /// The dedup guard: the most recent successful claim of `task_id`
    /// within `ttl` of `now`, if any.
    pub fn last_claim_within(
        &self,
        task_id: &TaskId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<EventRecord>, CoreError> {
        let filter = EventFilter::new()
            .with_cmd("claim")
            .with_task(task_id.clone())
            .with_result(event::RESULT_OK)
            .with_since(now - ttl);
        Ok(self.query(&filter)?.into_iter().last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(dir: &std::path::Path) -> EventLog {
        EventLog::open(dir.join("events.log")).unwrap()
    }

    #[test]
    fn test_append_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());

        log.append(&EventRecord::claim_ok(TaskId::new("a"), "%1", false))
            .unwrap();
        log.append(&EventRecord::claim_skipped(TaskId::new("b"), "conflict"))
            .unwrap();
        log.append(&EventRecord::release(TaskId::new("a"), false))
            .unwrap();

        let all = log.query(&EventFilter::new()).unwrap();
        assert_eq!(all.len(), 3);

        let claims = log.query(&EventFilter::new().with_cmd("claim")).unwrap();
        assert_eq!(claims.len(), 2);

        let a = log
            .query(&EventFilter::new().with_task(TaskId::new("a")))
            .unwrap();
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());

        log.append(&EventRecord::claim_ok(TaskId::new("a"), "%1", false))
            .unwrap();
        fsatomic::append_line(dir.path().join("events.log").as_path(), "{half a rec")
            .unwrap();
        log.append(&EventRecord::release(TaskId::new("a"), false))
            .unwrap();

        let all = log.query(&EventFilter::new()).unwrap();
        assert_eq!(all.len(), 2, "malformed line must not abort the scan");
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        assert!(log.query(&EventFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_last_claim_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let task = TaskId::new("a");

        let mut record = EventRecord::claim_ok(task.clone(), "%1", false);
        record.ts = Utc::now() - Duration::minutes(3);
        log.append(&record).unwrap();

        let now = Utc::now();
        assert!(log
            .last_claim_within(&task, Duration::minutes(5), now)
            .unwrap()
            .is_some());
        assert!(log
            .last_claim_within(&task, Duration::minutes(2), now)
            .unwrap()
            .is_none());
        // A skipped record never feeds the dedup guard.
        log.append(&EventRecord::claim_skipped(TaskId::new("b"), "conflict"))
            .unwrap();
        assert!(log
            .last_claim_within(&TaskId::new("b"), Duration::minutes(5), now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_round_trip_preserves_context() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());

        log.append(
            &EventRecord::transition_rejected(TaskId::new("a"), "QUEUED", "COMPLETED"),
        )
        .unwrap();

        let records = log
            .query(&EventFilter::new().with_result(event::RESULT_INVALID))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].context.get("from").map(String::as_str),
            Some("QUEUED")
        );
    }
}
