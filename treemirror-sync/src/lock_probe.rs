//! Is a path being written by someone else right now?
//!
//! The answer is racy by nature. Callers re-check immediately before acting
//! and treat a stale "unlocked" as a normal I/O failure.
//!
//! Only Windows enforces exclusive opens. On Unix, [`FsLockProbe`] sees a
//! file as locked only when it is missing or cannot be opened (permissions);
//! a file another process holds open for writing probes as unlocked. There,
//! partial copies are prevented by [`crate::copier::stage_file`], which
//! compares the source signature before and after copying and discards the
//! staged copy when it moved.

use std::fs::{self, OpenOptions};
use std::path::Path;

use treemirror_core::WaitPolicy;

pub trait LockProbe: Send + Sync {
    /// File: `true` unless it can be opened for exclusive read+write access.
    /// An existing directory is locked while it is not settled.
    fn is_locked(&self, path: &Path) -> bool;

    /// A directory is settled when no file in it is locked and every
    /// subdirectory is settled. An absent directory is settled.
    fn is_settled(&self, dir: &Path) -> bool {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(_) => return false,
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let settled = match entry.file_type() {
                Ok(t) if t.is_dir() => self.is_settled(&path),
                Ok(t) if t.is_file() => !self.is_locked(&path),
                Ok(_) => true,
                Err(_) => false,
            };
            if !settled {
                return false;
            }
        }
        true
    }
}

/// Probe backed by the host filesystem's sharing rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLockProbe;

impl LockProbe for FsLockProbe {
    fn is_locked(&self, path: &Path) -> bool {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => return true,
        };
        if meta.is_dir() {
            return !self.is_settled(path);
        }
        // Nobody can be mid-write on a read-only file; probe it for reading.
        let write = !meta.permissions().readonly();
        exclusive_open(path, write).is_err()
    }
}

#[cfg(windows)]
fn exclusive_open(path: &Path, write: bool) -> std::io::Result<fs::File> {
    use std::os::windows::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .write(write)
        .share_mode(0)
        .open(path)
}

#[cfg(not(windows))]
fn exclusive_open(path: &Path, write: bool) -> std::io::Result<fs::File> {
    OpenOptions::new().read(true).write(write).open(path)
}

/// Poll `probe` until `path` is unlocked or the policy runs out.
/// Returns `true` once the path is free.
pub fn wait_until_unlocked(probe: &dyn LockProbe, path: &Path, policy: WaitPolicy) -> bool {
    for attempt in 0..=policy.max_attempts {
        if !probe.is_locked(path) {
            return true;
        }
        if attempt < policy.max_attempts {
            tracing::trace!(path = %path.display(), attempt, "waiting for file to be released");
            std::thread::sleep(policy.interval);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Listed(HashSet<PathBuf>);

    impl LockProbe for Listed {
        fn is_locked(&self, path: &Path) -> bool {
            self.0.contains(path)
        }
    }

    #[test]
    fn missing_file_is_locked() {
        let tmp = TempDir::new().unwrap();
        assert!(FsLockProbe.is_locked(&tmp.path().join("nope.txt")));
    }

    #[test]
    fn plain_file_is_unlocked() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        fs::write(&path, "a").unwrap();
        assert!(!FsLockProbe.is_locked(&path));
    }

    #[cfg(unix)]
    #[test]
    fn open_writer_is_not_visible_on_unix() {
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("busy.txt");
        let mut writer = fs::File::create(&path).unwrap();
        writer.write_all(b"half").unwrap();
        assert!(!FsLockProbe.is_locked(&path));
    }

    #[test]
    fn absent_directory_is_settled() {
        let tmp = TempDir::new().unwrap();
        assert!(FsLockProbe.is_settled(&tmp.path().join("missing")));
    }

    #[test]
    fn directory_with_locked_nested_file_is_not_settled() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let busy = nested.join("busy.bin");
        fs::write(&busy, "x").unwrap();
        fs::write(tmp.path().join("free.txt"), "y").unwrap();

        let probe = Listed(HashSet::from([busy]));
        assert!(!probe.is_settled(tmp.path()));
        assert!(Listed(HashSet::new()).is_settled(tmp.path()));
    }

    #[test]
    fn wait_gives_up_after_policy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("busy.bin");
        let probe = Listed(HashSet::from([path.clone()]));
        let policy = WaitPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(1),
        };
        assert!(!wait_until_unlocked(&probe, &path, policy));
        assert!(wait_until_unlocked(&Listed(HashSet::new()), &path, policy));
    }
}
