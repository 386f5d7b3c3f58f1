//! Recursive tree copy with wait-until-available.
//!
//! ## File copy protocol
//!
//! 1. Copy bytes to `<dest>.treemirror.tmp` in the destination directory.
//! 2. Carry the source modification time onto the staged file.
//! 3. Optionally re-check the source signature; discard on mismatch.
//! 4. Rename the staged file over `<dest>`.
//!
//! A staged file that is never committed is removed when dropped, so a failed
//! or abandoned copy never leaves a partial file under the real name.

use std::fs;
use std::path::{Path, PathBuf};

use treemirror_core::{Signature, WaitPolicy, STAGING_SUFFIX};

use crate::error::{copy_io_err, CopyError};
use crate::lock_probe::{wait_until_unlocked, LockProbe};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyOptions {
    pub overwrite: bool,
    /// Wait for each file to be released before copying it. `None` copies
    /// without probing.
    pub wait: Option<WaitPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CopyReport {
    fn absorb(&mut self, other: CopyReport) {
        self.copied += other.copied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Staged file copy
// ---------------------------------------------------------------------------

/// A copied file waiting to be renamed into place.
#[derive(Debug)]
pub struct StagedCopy {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedCopy {
    /// Rename the staged file over the destination and return its signature.
    pub fn commit(mut self) -> Result<Signature, CopyError> {
        fs::rename(&self.tmp, &self.dest).map_err(|e| copy_io_err(&self.dest, e))?;
        self.committed = true;
        let meta = fs::metadata(&self.dest).map_err(|e| copy_io_err(&self.dest, e))?;
        Ok(Signature::from_metadata(&meta))
    }
}

impl Drop for StagedCopy {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(STAGING_SUFFIX);
    dest.with_file_name(name)
}

/// Copy `src` next to `dest` without touching `dest` yet.
///
/// When `expected` is given, the source must carry that signature both before
/// and after the bytes are copied, otherwise [`CopyError::SourceChanged`].
pub fn stage_file(
    src: &Path,
    dest: &Path,
    expected: Option<Signature>,
) -> Result<StagedCopy, CopyError> {
    let before = source_signature(src)?;
    if expected.is_some_and(|sig| sig != before) {
        return Err(CopyError::SourceChanged {
            path: src.to_path_buf(),
        });
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| copy_io_err(parent, e))?;
    }

    let staged = StagedCopy {
        tmp: staging_path(dest),
        dest: dest.to_path_buf(),
        committed: false,
    };
    fs::copy(src, &staged.tmp).map_err(|e| copy_io_err(&staged.tmp, e))?;
    filetime::set_file_mtime(&staged.tmp, before.modified())
        .map_err(|e| copy_io_err(&staged.tmp, e))?;

    let after = source_signature(src)?;
    if after != before {
        return Err(CopyError::SourceChanged {
            path: src.to_path_buf(),
        });
    }
    Ok(staged)
}

/// Stage and commit in one step.
pub fn copy_file(src: &Path, dest: &Path) -> Result<Signature, CopyError> {
    stage_file(src, dest, None)?.commit()
}

fn source_signature(src: &Path) -> Result<Signature, CopyError> {
    match fs::metadata(src) {
        Ok(meta) => Ok(Signature::from_metadata(&meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CopyError::SourceMissing {
            path: src.to_path_buf(),
        }),
        Err(e) => Err(copy_io_err(src, e)),
    }
}

// ---------------------------------------------------------------------------
// TreeCopier
// ---------------------------------------------------------------------------

pub struct TreeCopier<'a> {
    probe: &'a dyn LockProbe,
    options: CopyOptions,
}

impl<'a> TreeCopier<'a> {
    pub fn new(probe: &'a dyn LockProbe, options: CopyOptions) -> Self {
        Self { probe, options }
    }

    /// Copy a file or a whole directory tree from `source` to `dest`.
    ///
    /// A file source fails with [`CopyError::DestinationExists`] when the
    /// destination exists and overwrite is off. Inside a directory, per-file
    /// and per-subdirectory failures are logged and counted, never fatal.
    pub fn copy(&self, source: &Path, dest: &Path) -> Result<CopyReport, CopyError> {
        let meta = fs::metadata(source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CopyError::SourceMissing {
                path: source.to_path_buf(),
            },
            _ => copy_io_err(source, e),
        })?;

        if meta.is_dir() {
            return self.copy_dir(source, dest);
        }
        if dest.exists() && !self.options.overwrite {
            return Err(CopyError::DestinationExists {
                path: dest.to_path_buf(),
            });
        }
        copy_file(source, dest)?;
        tracing::debug!(src = %source.display(), dest = %dest.display(), "copied file");
        Ok(CopyReport {
            copied: 1,
            ..CopyReport::default()
        })
    }

    fn copy_dir(&self, source: &Path, dest: &Path) -> Result<CopyReport, CopyError> {
        fs::create_dir_all(dest).map_err(|e| copy_io_err(dest, e))?;
        let mut entries: Vec<_> = fs::read_dir(source)
            .map_err(|e| copy_io_err(source, e))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut report = CopyReport::default();
        let mut subdirs = Vec::new();

        for entry in entries {
            let src = entry.path();
            if entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX) {
                continue;
            }
            let dst = dest.join(entry.file_name());
            match entry.file_type() {
                Ok(t) if t.is_dir() => subdirs.push((src, dst)),
                Ok(t) if t.is_file() => self.copy_one(&src, &dst, &mut report),
                Ok(_) => tracing::trace!(path = %src.display(), "skipping non-regular entry"),
                Err(e) => {
                    tracing::error!(path = %src.display(), error = %e, "cannot read entry type");
                    report.failed += 1;
                }
            }
        }

        for (src, dst) in subdirs {
            match self.copy_dir(&src, &dst) {
                Ok(sub) => report.absorb(sub),
                Err(e) => {
                    tracing::error!(path = %src.display(), error = %e, "subdirectory copy failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn copy_one(&self, src: &Path, dst: &Path, report: &mut CopyReport) {
        if dst.exists() && !self.options.overwrite {
            tracing::debug!(path = %dst.display(), "destination exists, skipping");
            report.skipped += 1;
            return;
        }
        if let Some(policy) = self.options.wait {
            if !wait_until_unlocked(self.probe, src, policy) {
                tracing::warn!(path = %src.display(), "file still in use, skipping");
                report.skipped += 1;
                return;
            }
        }
        match copy_file(src, dst) {
            Ok(_) => {
                tracing::debug!(src = %src.display(), dest = %dst.display(), "copied file");
                report.copied += 1;
            }
            Err(e) => {
                tracing::error!(path = %src.display(), error = %e, "copy failed");
                report.failed += 1;
            }
        }
    }
}
