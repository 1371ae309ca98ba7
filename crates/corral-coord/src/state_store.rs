//! Persisted per-task lifecycle records.
//!
//! One JSON `StateRecord` per task, written with an atomic replace so a
//! reader never sees a torn record. Only this store mutates records; the
//! transition table itself lives in `corral_core::state`.

use crate::fsatomic;
use corral_core::{CoreError, StateRecord, StateTransition, TaskId, TaskState};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

/// File-backed state records keyed by task id.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) the state directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", task_id.file_stem()))
    }

    /// Create the record for a freshly claimed task.
    ///
    /// Claiming starts a new lifecycle: any previous record (a retired
    /// terminal one, or the abandoned record of a crashed owner whose lease
    /// was stolen) is superseded. The full trail survives in the event log.
    pub fn create_claimed(
        &self,
        task_id: &TaskId,
        context: impl Into<String>,
    ) -> Result<StateRecord, CoreError> {
        let record = StateRecord::claimed(task_id.clone(), context);
        self.persist(&record)?;
        debug!(task_id = %task_id, "state record created");
        Ok(record)
    }

    /// Apply a transition and persist the updated record.
    ///
    /// An invalid transition mutates nothing on disk and surfaces the
    /// rejected from/to pair.
    pub fn transition(
        &self,
        task_id: &TaskId,
        to: TaskState,
        context: impl Into<String>,
    ) -> Result<StateRecord, CoreError> {
        let mut record = self
            .load(task_id)?
            .ok_or_else(|| CoreError::NoStateRecord(task_id.to_string()))?;
        record.apply(to, context)?;
        self.persist(&record)?;
        debug!(task_id = %task_id, state = %record.state, "state transition applied");
        Ok(record)
    }

    /// Current state of a task.
    pub fn get_state(&self, task_id: &TaskId) -> Result<TaskState, CoreError> {
        self.load(task_id)?
            .map(|r| r.state)
            .ok_or_else(|| CoreError::NoStateRecord(task_id.to_string()))
    }

    /// Full transition history of a task.
    pub fn get_history(&self, task_id: &TaskId) -> Result<Vec<StateTransition>, CoreError> {
        self.load(task_id)?
            .map(|r| r.history)
            .ok_or_else(|| CoreError::NoStateRecord(task_id.to_string()))
    }

    /// Load a record, if one exists.
    pub fn load(&self, task_id: &TaskId) -> Result<Option<StateRecord>, CoreError> {
        let path = self.record_path(task_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Serialization(format!("{}: {e}", path.display())))?;
        Ok(Some(record))
    }

    fn persist(&self, record: &StateRecord) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        fsatomic::replace(&self.record_path(&record.task_id), &json)?;
        Ok(())
    }
}
