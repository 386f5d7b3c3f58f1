//! Recycle bin for what replication deletes or overwrites.
//!
//! Each destination tree gets its own bin under the state directory:
//!
//! ```text
//! <state_dir>/recycle/<tree digest>/<UTC timestamp>/<relative path>
//! ```
//!
//! Deleted victims are renamed into the bin. Overwritten files are copied
//! there before the new content replaces them. When the bin is on another
//! filesystem a deleted victim is copied first and removed afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use treemirror_core::catalog::tree_digest;
use treemirror_core::types::resolve;

use crate::copier::{copy_file, CopyOptions, TreeCopier};
use crate::error::{io_err, CopyError, SyncError};
use crate::lock_probe::FsLockProbe;

pub const RECYCLE_DIR: &str = "recycle";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleBin {
    dir: PathBuf,
}

impl RecycleBin {
    pub fn for_tree(state_dir: &Path, tree_root: &Path) -> Self {
        Self {
            dir: state_dir.join(RECYCLE_DIR).join(tree_digest(tree_root)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move `victim` (file or directory) into the bin under `rel`.
    ///
    /// Returns where it landed, or `None` if the victim was already gone.
    pub fn recycle(&self, victim: &Path, rel: &str) -> Result<Option<PathBuf>, SyncError> {
        let meta = match fs::symlink_metadata(victim) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(victim, e)),
        };
        let target = self.free_slot(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        match fs::rename(victim, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(io_err(victim, e))
            }
            Err(_) if meta.is_dir() => move_dir_across(victim, &target)?,
            Err(_) => {
                copy_file(victim, &target)?;
                fs::remove_file(victim).map_err(|e| io_err(victim, e))?;
            }
        }
        tracing::debug!(path = %rel, bin = %target.display(), "recycled");
        Ok(Some(target))
    }

    /// Copy the file at `victim` into the bin and leave it in place, for
    /// content about to be replaced by an atomic rename.
    pub fn preserve(&self, victim: &Path, rel: &str) -> Result<Option<PathBuf>, SyncError> {
        if !victim.is_file() {
            return Ok(None);
        }
        let target = self.free_slot(rel);
        match copy_file(victim, &target) {
            Ok(_) => {}
            Err(CopyError::SourceMissing { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(path = %rel, bin = %target.display(), "previous version kept");
        Ok(Some(target))
    }

    /// `<stamp>/<rel>`, with a numeric suffix on the stamp when two victims
    /// of the same path land in the same millisecond.
    fn free_slot(&self, rel: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut target = resolve(&self.dir.join(&stamp), rel);
        let mut n = 1;
        while target.exists() {
            target = resolve(&self.dir.join(format!("{stamp}-{n}")), rel);
            n += 1;
        }
        target
    }
}

fn move_dir_across(victim: &Path, target: &Path) -> Result<(), SyncError> {
    let options = CopyOptions {
        overwrite: true,
        wait: None,
    };
    let report = TreeCopier::new(&FsLockProbe, options).copy(victim, target)?;
    if report.failed > 0 {
        return Err(io_err(
            victim,
            io::Error::other(format!("{} file(s) could not be recycled", report.failed)),
        ));
    }
    fs::remove_dir_all(victim).map_err(|e| io_err(victim, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_moves_into_per_tree_bin() {
        let (state, tree) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let victim = tree.path().join("docs").join("a.txt");
        fs::create_dir_all(victim.parent().unwrap()).unwrap();
        fs::write(&victim, "old").unwrap();

        let bin = RecycleBin::for_tree(state.path(), tree.path());
        let kept = bin.recycle(&victim, "docs/a.txt").unwrap().unwrap();

        assert!(!victim.exists());
        assert!(kept.starts_with(bin.dir()));
        assert!(kept.ends_with("docs/a.txt"));
        assert_eq!(fs::read_to_string(kept).unwrap(), "old");
    }

    #[test]
    fn same_path_twice_keeps_both_copies() {
        let (state, tree) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let bin = RecycleBin::for_tree(state.path(), tree.path());
        let victim = tree.path().join("a.txt");

        fs::write(&victim, "one").unwrap();
        let first = bin.recycle(&victim, "a.txt").unwrap().unwrap();
        fs::write(&victim, "two").unwrap();
        let second = bin.recycle(&victim, "a.txt").unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first).unwrap(), "one");
        assert_eq!(fs::read_to_string(second).unwrap(), "two");
    }

    #[test]
    fn directory_is_recycled_whole() {
        let (state, tree) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let victim = tree.path().join("dir");
        fs::create_dir_all(victim.join("sub")).unwrap();
        fs::write(victim.join("sub").join("f.txt"), "f").unwrap();

        let bin = RecycleBin::for_tree(state.path(), tree.path());
        let kept = bin.recycle(&victim, "dir").unwrap().unwrap();

        assert!(!victim.exists());
        assert_eq!(fs::read_to_string(kept.join("sub").join("f.txt")).unwrap(), "f");
    }

    #[test]
    fn preserve_leaves_the_original_in_place() {
        let (state, tree) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let victim = tree.path().join("a.txt");
        fs::write(&victim, "v1").unwrap();

        let bin = RecycleBin::for_tree(state.path(), tree.path());
        let kept = bin.preserve(&victim, "a.txt").unwrap().unwrap();

        assert_eq!(fs::read_to_string(&victim).unwrap(), "v1");
        assert_eq!(fs::read_to_string(kept).unwrap(), "v1");
    }

    #[test]
    fn missing_victim_is_not_an_error() {
        let (state, tree) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let bin = RecycleBin::for_tree(state.path(), tree.path());
        assert_eq!(bin.recycle(&tree.path().join("gone.txt"), "gone.txt").unwrap(), None);
    }

    #[test]
    fn bins_are_separate_per_tree() {
        let (state, a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        assert_ne!(
            RecycleBin::for_tree(state.path(), a.path()),
            RecycleBin::for_tree(state.path(), b.path())
        );
    }
}
