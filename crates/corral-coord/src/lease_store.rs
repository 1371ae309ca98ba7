//! File-backed lease store.
//!
//! One `key=value` file per task. Acquisition is exclusive create; stealing
//! is a single-winner atomic capture of the stale file followed by
//! exclusive re-create. Whether an existing lease is ACTIVE or STALE is
//! always answered by the liveness oracle, never by the file alone.

use crate::fsatomic;
use crate::providers::LivenessOracle;
use corral_core::{CoreError, Lease, LeaseClass, TaskId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LEASE_EXT: &str = "lease";

/// One row of a full-store enumeration.
///
/// A corrupted file yields an entry with `lease: None` and a `Corrupted`
/// classification; it is surfaced, never dropped.
#[derive(Debug, Clone)]
pub struct LeaseEntry {
    /// Task the file claims (derived from the filename for corrupted files).
    pub task_id: TaskId,

    /// Classification at enumeration time.
    pub class: LeaseClass,

    /// The parsed lease, when parsing succeeded.
    pub lease: Option<Lease>,

    /// Where the file lives.
    pub path: PathBuf,
}

/// File-backed leases keyed by task id.
pub struct LeaseStore<O> {
    dir: PathBuf,
    oracle: O,
}

impl<O: LivenessOracle> LeaseStore<O> {
    /// Open (creating if needed) the lease directory.
    pub fn open(dir: impl Into<PathBuf>, oracle: O) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, oracle })
    }

    /// Path of the lease file for a task.
    pub fn lease_path(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.{}", task_id.file_stem(), LEASE_EXT))
    }

    /// Claim a task that has no lease.
    ///
    /// Atomic against concurrent callers via exclusive create; there is no
    /// read-then-write window. Fails with `AlreadyActive` whenever a lease
    /// file is present — claiming over a stale one requires [`steal`].
    ///
    /// [`steal`]: LeaseStore::steal
    pub fn acquire(
        &self,
        task_id: &TaskId,
        pane: &str,
        window: &str,
        agent: &str,
    ) -> Result<Lease, CoreError> {
        let lease = Lease::new(task_id.clone(), pane, window, agent);
        let path = self.lease_path(task_id);
        if fsatomic::write_exclusive(&path, &lease.to_file_format())? {
            debug!(task_id = %task_id, pane = %pane, "lease acquired");
            Ok(lease)
        } else {
            Err(CoreError::AlreadyActive {
                task_id: task_id.to_string(),
            })
        }
    }

    /// Take over a stale lease.
    ///
    /// The one true race in the system. The stale file is captured with an
    /// atomic rename — exactly one of N concurrent stealers gets it — and
    /// then verified against the version that was classified: capturing a
    /// file some faster claimer re-created in the meantime puts it back and
    /// bows out. A winner that then loses the re-create to a fresh acquirer
    /// reports `AlreadyActive`.
    pub fn steal(
        &self,
        task_id: &TaskId,
        pane: &str,
        window: &str,
        agent: &str,
    ) -> Result<Lease, CoreError> {
        let path = self.lease_path(task_id);
        let observed = match read_lease(&path)? {
            None => {
                return Err(CoreError::NotStale {
                    task_id: task_id.to_string(),
                })
            }
            Some(Err(reason)) => return Err(CoreError::Corrupted { path, reason }),
            Some(Ok(lease)) => lease,
        };
        if self.oracle.is_alive(&observed.pane)? {
            return Err(CoreError::AlreadyActive {
                task_id: task_id.to_string(),
            });
        }

        // Side name is unique per caller (pid + the stealer's own pane), so
        // concurrent stealers never touch each other's captured file.
        let side = self.dir.join(format!(
            ".steal-{}-{}-{}",
            task_id.file_stem(),
            std::process::id(),
            safe_component(pane),
        ));
        if !fsatomic::capture(&path, &side)? {
            // Another stealer captured the file first.
            return Err(CoreError::NotStale {
                task_id: task_id.to_string(),
            });
        }

        // We own `side` exclusively; check we captured the lease we
        // classified as stale, not a claim re-created under a new handle.
        let captured = fs::read_to_string(&side)?;
        let captured_pane = Lease::parse(&captured).ok().map(|l| l.pane);
        if captured_pane.as_deref() != Some(observed.pane.as_str()) {
            if !fsatomic::write_exclusive(&path, &captured)? {
                warn!(task_id = %task_id, "raced lease superseded before restore");
            }
            let _ = fs::remove_file(&side);
            return Err(CoreError::AlreadyActive {
                task_id: task_id.to_string(),
            });
        }
        let _ = fs::remove_file(&side);

        let lease = Lease::new(task_id.clone(), pane, window, agent);
        if fsatomic::write_exclusive(&path, &lease.to_file_format())? {
            debug!(task_id = %task_id, pane = %pane, prior_pane = %observed.pane, "stale lease stolen");
            Ok(lease)
        } else {
            Err(CoreError::AlreadyActive {
                task_id: task_id.to_string(),
            })
        }
    }

    /// Classify the task's lease.
    pub fn classify(&self, task_id: &TaskId) -> Result<LeaseClass, CoreError> {
        let path = self.lease_path(task_id);
        match read_lease(&path)? {
            None => Ok(LeaseClass::Absent),
            Some(Err(reason)) => Ok(LeaseClass::Corrupted { reason }),
            Some(Ok(lease)) => {
                if self.oracle.is_alive(&lease.pane)? {
                    Ok(LeaseClass::Active)
                } else {
                    Ok(LeaseClass::Stale)
                }
            }
        }
    }

    /// Read the lease for a task, if present and parseable.
    pub fn get(&self, task_id: &TaskId) -> Result<Option<Lease>, CoreError> {
        let path = self.lease_path(task_id);
        match read_lease(&path)? {
            None => Ok(None),
            Some(Ok(lease)) => Ok(Some(lease)),
            Some(Err(reason)) => Err(CoreError::Corrupted { path, reason }),
        }
    }

    /// Release a task's lease.
    ///
    /// Refuses while the lease is ACTIVE unless `force`. With `force` the
    /// file is removed regardless of classification, corrupted included.
    /// Releasing an absent lease is a no-op.
    pub fn release(&self, task_id: &TaskId, force: bool) -> Result<(), CoreError> {
        let path = self.lease_path(task_id);
        if force {
            fsatomic::take_down(&path)?;
            return Ok(());
        }
        match self.classify(task_id)? {
            LeaseClass::Absent => Ok(()),
            LeaseClass::Active => Err(CoreError::StillActive {
                task_id: task_id.to_string(),
            }),
            LeaseClass::Stale => {
                fsatomic::take_down(&path)?;
                Ok(())
            }
            LeaseClass::Corrupted { reason } => Err(CoreError::Corrupted { path, reason }),
        }
    }

    /// Enumerate every lease file with its classification.
    ///
    /// Per-entry parse failures are isolated: one unreadable file becomes a
    /// `Corrupted` entry and the rest of the enumeration proceeds.
    pub fn list_all(&self) -> Result<Vec<LeaseEntry>, CoreError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEASE_EXT) {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            match read_lease(&path)? {
                // Unlinked between read_dir and open; skip.
                None => continue,
                Some(Ok(lease)) => {
                    let class = if self.oracle.is_alive(&lease.pane)? {
                        LeaseClass::Active
                    } else {
                        LeaseClass::Stale
                    };
                    entries.push(LeaseEntry {
                        task_id: lease.task_id.clone(),
                        class,
                        lease: Some(lease),
                        path,
                    });
                }
                Some(Err(reason)) => {
                    warn!(path = %path.display(), reason = %reason, "corrupted lease file");
                    entries.push(LeaseEntry {
                        task_id: TaskId::new(stem),
                        class: LeaseClass::Corrupted { reason },
                        lease: None,
                        path,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(entries)
    }
}

fn safe_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Read and parse a lease file.
///
/// `Ok(None)` means absent; `Ok(Some(Err(..)))` means present but
/// unparseable, with the raw reason preserved.
fn read_lease(path: &Path) -> Result<Option<Result<Lease, String>>, CoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(Lease::parse(&contents).map_err(|e| e.to_string())))
}
