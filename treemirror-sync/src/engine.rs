//! One-way replication of a change set from a source tree into its peer.
//!
//! Each [`ChangeRecord`] is applied independently: a failure is recorded in
//! the [`SyncOutcome`] and the batch continues. Nothing that was skipped or
//! failed is marked synced, so it is retried next cycle.
//!
//! ## Conflict policy
//!
//! The first pass of a cycle runs in [`PassMode::Yield`] and leaves alone any
//! destination file carrying its own unsynced change. The second pass runs in
//! [`PassMode::Overwrite`] and replaces it, logging a conflict warning, so the
//! last pass wins. Content always beats deletion: a delete never removes an
//! unsynced destination edit, and a content change resurrects a destination
//! tombstone.
//!
//! With [`ReplicationEngine::with_recycling`], every destination file or
//! directory that a pass deletes or overwrites is moved into the destination
//! tree's [`RecycleBin`] first.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Serialize;
use treemirror_core::types::resolve;
use treemirror_core::{
    ChangeCatalog, ChangeKind, ChangeRecord, EntryKind, FileRecord, Signature, WaitPolicy,
};

use crate::copier::stage_file;
use crate::error::{io_err, CopyError, SyncError};
use crate::lock_probe::{wait_until_unlocked, LockProbe};
use crate::recycle::RecycleBin;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// Skip paths whose destination has an unsynced content change.
    Yield,
    /// Overwrite them and log the conflict.
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The source catalog moved past this record's version.
    Superseded,
    SourceBusy,
    SourceGone,
    DestinationBusy,
    Conflict,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Superseded => "superseded",
            SkipReason::SourceBusy => "source busy",
            SkipReason::SourceGone => "source gone",
            SkipReason::DestinationBusy => "destination busy",
            SkipReason::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failed {
    pub path: String,
    pub error: String,
}

/// Totals for one replication pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub considered: usize,
    pub applied: usize,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<Failed>,
}

impl SyncOutcome {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|s| s.reason == reason).count()
    }
}

enum Action {
    Applied,
    Skip(SkipReason),
}

// ---------------------------------------------------------------------------
// ReplicationEngine
// ---------------------------------------------------------------------------

pub struct ReplicationEngine<'a> {
    probe: &'a dyn LockProbe,
    wait: WaitPolicy,
    recycle_state: Option<&'a Path>,
}

impl<'a> ReplicationEngine<'a> {
    /// `wait` bounds how long a locked source file is waited on before the
    /// change is deferred to the next cycle.
    pub fn new(probe: &'a dyn LockProbe, wait: WaitPolicy) -> Self {
        Self {
            probe,
            wait,
            recycle_state: None,
        }
    }

    /// Keep deleted and overwritten destination entries in per-tree recycle
    /// bins under `state_dir`.
    pub fn with_recycling(mut self, state_dir: &'a Path) -> Self {
        self.recycle_state = Some(state_dir);
        self
    }

    /// Apply `changes` (detected in `source_root`) to `dest_root`, in order.
    pub fn replicate_one_way(
        &self,
        changes: &[ChangeRecord],
        source_root: &Path,
        dest_root: &Path,
        source_catalog: &mut ChangeCatalog,
        dest_catalog: &mut ChangeCatalog,
        mode: PassMode,
    ) -> SyncOutcome {
        let mut pass = Pass {
            probe: self.probe,
            wait: self.wait,
            src_root: source_root,
            dst_root: dest_root,
            src: source_catalog,
            dst: dest_catalog,
            mode,
            bin: self
                .recycle_state
                .map(|state| RecycleBin::for_tree(state, dest_root)),
        };
        let mut outcome = SyncOutcome::default();

        for change in changes {
            outcome.considered += 1;
            match pass.apply(change) {
                Ok(Action::Applied) => {
                    tracing::debug!(change = %change, dest = %dest_root.display(), "applied");
                    outcome.applied += 1;
                }
                Ok(Action::Skip(reason)) => {
                    tracing::debug!(path = %change.path, kind = %change.kind, %reason, "skipped");
                    outcome.skipped.push(Skipped {
                        path: change.path.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        path = %change.path,
                        kind = %change.kind,
                        error = %e,
                        "operation failed, will retry next cycle"
                    );
                    outcome.failed.push(Failed {
                        path: change.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Per-record application
// ---------------------------------------------------------------------------

struct Pass<'p> {
    probe: &'p dyn LockProbe,
    wait: WaitPolicy,
    src_root: &'p Path,
    dst_root: &'p Path,
    src: &'p mut ChangeCatalog,
    dst: &'p mut ChangeCatalog,
    mode: PassMode,
    bin: Option<RecycleBin>,
}

impl Pass<'_> {
    fn apply(&mut self, change: &ChangeRecord) -> Result<Action, SyncError> {
        match self.src.lookup(&change.path) {
            Some(current) if current.version == change.version && current.is_pending() => {}
            _ => return Ok(Action::Skip(SkipReason::Superseded)),
        }
        match (change.kind, change.old_path.as_deref()) {
            (ChangeKind::Delete, _) => self.delete_path(&change.path),
            (ChangeKind::Rename, Some(old)) => self.apply_rename(change, old),
            (_, _) if change.entry == EntryKind::Directory => self.apply_directory(change),
            (_, _) => self.apply_file(change),
        }
    }

    // -----------------------------------------------------------------------
    // Create / Update
    // -----------------------------------------------------------------------

    fn apply_directory(&mut self, change: &ChangeRecord) -> Result<Action, SyncError> {
        let rel = change.path.as_str();
        let dst_path = resolve(self.dst_root, rel);

        if let Ok(meta) = fs::symlink_metadata(&dst_path) {
            if !meta.is_dir() {
                if self.dest_file_unsynced(rel, &dst_path) && self.mode == PassMode::Yield {
                    return Ok(Action::Skip(SkipReason::Conflict));
                }
                if self.probe.is_locked(&dst_path) {
                    return Ok(Action::Skip(SkipReason::DestinationBusy));
                }
                self.discard(&dst_path, rel, false)?;
            }
        }
        fs::create_dir_all(&dst_path).map_err(|e| io_err(&dst_path, e))?;
        self.record_dest(rel, EntryKind::Directory, None);
        self.src.mark_synced(rel, change.version);
        Ok(Action::Applied)
    }

    fn apply_file(&mut self, change: &ChangeRecord) -> Result<Action, SyncError> {
        let rel = change.path.as_str();
        let src_path = resolve(self.src_root, rel);
        let dst_path = resolve(self.dst_root, rel);
        let expected = self.src.lookup(rel).and_then(|r| r.signature);

        if !fs::symlink_metadata(&src_path).is_ok_and(|m| m.is_file()) {
            return Ok(Action::Skip(SkipReason::SourceGone));
        }
        if !wait_until_unlocked(self.probe, &src_path, self.wait) {
            return Ok(Action::Skip(SkipReason::SourceBusy));
        }

        if let Ok(meta) = fs::symlink_metadata(&dst_path) {
            if meta.is_dir() {
                if self.dst.has_pending_under(rel) {
                    tracing::warn!(path = %rel, "file replaces a directory with unsynced changes, skipping");
                    return Ok(Action::Skip(SkipReason::Conflict));
                }
                if !self.probe.is_settled(&dst_path) {
                    return Ok(Action::Skip(SkipReason::DestinationBusy));
                }
                self.discard(&dst_path, rel, true)?;
                self.dst.purge_under(rel);
            } else {
                let current = Signature::from_metadata(&meta);
                if let Some(record) = self.dst.lookup(rel) {
                    let tracked = !record.tombstone && record.kind == EntryKind::File;
                    if tracked && record.signature == Some(current) && expected == Some(current) {
                        return Ok(self.already_in_sync(change));
                    }
                    if tracked && record.signature != Some(current) {
                        tracing::debug!(path = %rel, "destination changed since scan");
                        return Ok(Action::Skip(SkipReason::DestinationBusy));
                    }
                }
                if self.dest_file_unsynced(rel, &dst_path) {
                    match self.mode {
                        PassMode::Yield => return Ok(Action::Skip(SkipReason::Conflict)),
                        PassMode::Overwrite => tracing::warn!(
                            path = %rel,
                            dest = %self.dst_root.display(),
                            "conflict: both trees changed, keeping the source copy"
                        ),
                    }
                }
                if self.probe.is_locked(&dst_path) {
                    return Ok(Action::Skip(SkipReason::DestinationBusy));
                }
            }
        }

        let staged = match stage_file(&src_path, &dst_path, expected) {
            Ok(staged) => staged,
            Err(CopyError::SourceChanged { .. }) => {
                tracing::debug!(path = %rel, "source changed during copy");
                return Ok(Action::Skip(SkipReason::SourceBusy));
            }
            Err(CopyError::SourceMissing { .. }) => return Ok(Action::Skip(SkipReason::SourceGone)),
            Err(e) => return Err(e.into()),
        };
        if let Some(bin) = &self.bin {
            bin.preserve(&dst_path, rel)?;
        }
        let signature = staged.commit()?;
        self.record_dest(rel, EntryKind::File, Some(signature));
        self.src.mark_synced(rel, change.version);
        Ok(Action::Applied)
    }

    fn already_in_sync(&mut self, change: &ChangeRecord) -> Action {
        if let Some(mut record) = self.dst.lookup(&change.path).cloned() {
            record.synced_version = record.version;
            self.dst.upsert(record);
        }
        self.src.mark_synced(&change.path, change.version);
        tracing::debug!(path = %change.path, "already identical at destination");
        Action::Applied
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    fn delete_path(&mut self, rel: &str) -> Result<Action, SyncError> {
        let dst_path = resolve(self.dst_root, rel);
        match fs::symlink_metadata(&dst_path) {
            Err(_) => {}
            Ok(meta) if meta.is_dir() => {
                if self.dst.has_pending_under(rel) {
                    return Ok(self.retire_tombstone(rel));
                }
                if !self.probe.is_settled(&dst_path) {
                    return Ok(Action::Skip(SkipReason::DestinationBusy));
                }
                self.discard(&dst_path, rel, true)?;
            }
            Ok(_) => {
                if self.dest_file_unsynced(rel, &dst_path) {
                    return Ok(self.retire_tombstone(rel));
                }
                if self.probe.is_locked(&dst_path) {
                    return Ok(Action::Skip(SkipReason::DestinationBusy));
                }
                self.discard(&dst_path, rel, false)?;
            }
        }
        self.dst.purge_under(rel);
        self.src.purge(rel);
        Ok(Action::Applied)
    }

    /// The destination holds an edit the source never saw. Keep it, and drop
    /// the source tombstone so the edit flows back on the return pass.
    fn retire_tombstone(&mut self, rel: &str) -> Action {
        tracing::warn!(
            path = %rel,
            dest = %self.dst_root.display(),
            "conflict: delete skipped, destination copy was modified"
        );
        self.src.purge(rel);
        Action::Skip(SkipReason::Conflict)
    }

    // -----------------------------------------------------------------------
    // Rename
    // -----------------------------------------------------------------------

    fn apply_rename(&mut self, change: &ChangeRecord, old: &str) -> Result<Action, SyncError> {
        let rel = change.path.as_str();
        let old_dst = resolve(self.dst_root, old);
        let new_dst = resolve(self.dst_root, rel);
        let expected = self.src.lookup(rel).and_then(|r| r.signature);

        let old_record = self.dst.lookup(old).cloned();
        let movable = match (&old_record, fs::symlink_metadata(&old_dst)) {
            (Some(record), Ok(meta)) => {
                meta.is_file()
                    && !record.tombstone
                    && !record.is_pending()
                    && record.signature == Some(Signature::from_metadata(&meta))
            }
            _ => false,
        };

        if !movable || new_dst.exists() {
            // Plain create of the new path, then treat the old path as deleted.
            let created = self.apply_file(change)?;
            if let Action::Applied = created {
                if let Action::Skip(reason) = self.delete_path(old)? {
                    tracing::debug!(path = %old, %reason, "old name left in place");
                }
            }
            return Ok(created);
        }

        if self.probe.is_locked(&old_dst) {
            return Ok(Action::Skip(SkipReason::DestinationBusy));
        }
        let same_content = old_record.and_then(|r| r.signature) == expected;
        let signature = if same_content {
            if let Some(parent) = new_dst.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            fs::rename(&old_dst, &new_dst).map_err(|e| io_err(&new_dst, e))?;
            let meta = fs::metadata(&new_dst).map_err(|e| io_err(&new_dst, e))?;
            Signature::from_metadata(&meta)
        } else {
            let src_path = resolve(self.src_root, rel);
            let staged = match stage_file(&src_path, &new_dst, expected) {
                Ok(staged) => staged,
                Err(CopyError::SourceChanged { .. }) => {
                    return Ok(Action::Skip(SkipReason::SourceBusy))
                }
                Err(CopyError::SourceMissing { .. }) => {
                    return Ok(Action::Skip(SkipReason::SourceGone))
                }
                Err(e) => return Err(e.into()),
            };
            let signature = staged.commit()?;
            self.discard(&old_dst, old, false)?;
            signature
        };

        self.dst.purge(old);
        self.record_dest(rel, EntryKind::File, Some(signature));
        self.src.purge(old);
        self.src.mark_synced(rel, change.version);
        Ok(Action::Applied)
    }

    /// Take `path` out of the destination tree: into the recycle bin when one
    /// is configured, otherwise gone for good. Already missing is fine.
    fn discard(&self, path: &Path, rel: &str, is_dir: bool) -> Result<(), SyncError> {
        match &self.bin {
            Some(bin) => bin.recycle(path, rel).map(|_| ()),
            None if is_dir => remove(fs::remove_dir_all(path), path),
            None => remove(fs::remove_file(path), path),
        }
    }

    // -----------------------------------------------------------------------
    // Catalog helpers
    // -----------------------------------------------------------------------

    /// Destination file holds content the source has not seen: a pending
    /// tracked edit, or a file that arrived after the destination was scanned.
    fn dest_file_unsynced(&self, rel: &str, dst_path: &Path) -> bool {
        match self.dst.lookup(rel) {
            Some(record) => record.kind == EntryKind::File && record.has_pending_content(),
            None => dst_path.exists(),
        }
    }

    /// Record applied state in the destination catalog as already synced.
    fn record_dest(&mut self, rel: &str, kind: EntryKind, signature: Option<Signature>) {
        let record = match self.dst.lookup(rel) {
            Some(prev) if !prev.tombstone && prev.kind == kind && prev.signature == signature => {
                let mut record = prev.clone();
                record.synced_version = record.version;
                record
            }
            Some(prev) => {
                let mut record = prev.clone();
                record.version += 1;
                record.kind = kind;
                record.signature = signature;
                record.tombstone = false;
                record.tombstoned_at = None;
                record.synced_version = record.version;
                record
            }
            None => {
                let mut record = FileRecord::new(rel, kind, signature);
                record.synced_version = record.version;
                record
            }
        };
        self.dst.upsert(record);
    }
}

/// Removal that tolerates the target already being gone.
fn remove(result: std::io::Result<()>, path: &Path) -> Result<(), SyncError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}
