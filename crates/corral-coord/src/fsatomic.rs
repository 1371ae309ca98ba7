//! Atomic filesystem primitives.
//!
//! The filesystem is the only mutex in the system: racing processes are
//! serialized by exclusive create, atomic rename, single-winner unlink, and
//! O_APPEND writes. Every mutation in this crate goes through one of the
//! four primitives below, so the exclusion semantics live (and are tested)
//! in exactly one place. None of them block, retry, or wait.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Create `path` exclusively and write `contents`.
///
/// Returns `Ok(true)` if this caller created the file, `Ok(false)` if it
/// already existed. Among N concurrent callers exactly one observes `true`.
pub fn write_exclusive(path: &Path, contents: &str) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove `path`.
///
/// Returns `Ok(true)` for the one caller whose unlink succeeded and
/// `Ok(false)` for everyone who found it already gone. This is the
/// single-winner primitive behind lease stealing.
pub fn take_down(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Atomically move `from` aside to `to`.
///
/// Returns `Ok(true)` for the caller whose rename captured the file and
/// `Ok(false)` for everyone who found it already gone. The capturer owns
/// `to` exclusively afterwards.
pub fn capture(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Atomically replace the contents of `path`.
///
/// Writes a temp sibling and renames it over the target, so readers see
/// either the old contents or the new, never a partial write.
pub fn replace(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = temp_sibling(path);
    fs::write(&tmp, contents)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Append one newline-terminated line to `path` with O_APPEND semantics.
///
/// The line is written with a single `write_all` on an append-mode handle,
/// so concurrent appenders from independent processes never interleave
/// within a line.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    file.write_all(&buf)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    // Pid-qualified so two processes replacing the same record never share
    // a temp file.
    let tmp_name = format!(".{}.{}.tmp", name, std::process::id());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_exclusive_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lease");

        assert!(write_exclusive(&path, "first").unwrap());
        assert!(!write_exclusive(&path, "second").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn test_take_down_reports_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lease");
        fs::write(&path, "x").unwrap();

        assert!(take_down(&path).unwrap());
        assert!(!take_down(&path).unwrap());
    }

    #[test]
    fn test_capture_reports_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lease");
        fs::write(&path, "x").unwrap();

        assert!(capture(&path, &dir.path().join("side-a")).unwrap());
        assert!(!capture(&path, &dir.path().join("side-b")).unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("side-a")).unwrap(), "x");
    }

    #[test]
    fn test_replace_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "old").unwrap();

        replace(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        // No temp sibling left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_append_line_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        append_line(&path, "one").unwrap();
        append_line(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
