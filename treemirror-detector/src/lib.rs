//! Change detection for `treemirror-detector`.
//!
//! `detect(root, filter, catalog)` walks one tree, compares every entry with
//! the tree's [`ChangeCatalog`], records the new state in the catalog, and
//! returns the differences as [`ChangeRecord`]s sorted by relative path.
//! A second run over an unchanged tree returns nothing.
//!
//! `outstanding(catalog, fresh)` rebuilds records for catalog entries that are
//! still ahead of their last-synced version, so a change skipped or failed in
//! an earlier cycle is retried without the walk having to see it again.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use treemirror_core::types::is_under;
use treemirror_core::{
    ChangeCatalog, ChangeKind, ChangeRecord, EntryKind, FileRecord, FilterSet, Signature,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from change detection.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The tree root is missing or not a directory. Nothing was recorded, so
    /// an unmounted share never reads as "everything deleted".
    #[error("tree root '{path}' is not reachable")]
    RootUnavailable { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One entry found by the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    kind: EntryKind,
    signature: Option<Signature>,
}

/// Result of walking a tree: entries by key, plus subtrees whose contents
/// could not be listed.
#[derive(Debug, Default)]
struct Snapshot {
    entries: BTreeMap<String, Observed>,
    unreadable: Vec<String>,
}

impl Snapshot {
    fn is_unreadable(&self, key: &str) -> bool {
        self.unreadable.iter().any(|prefix| is_under(key, prefix))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Scan `root`, update `catalog`, and return the changes since the last scan.
pub fn detect(
    root: &Path,
    filter: &FilterSet,
    catalog: &mut ChangeCatalog,
) -> Result<Vec<ChangeRecord>, DetectError> {
    let meta = fs::metadata(root).map_err(|_| DetectError::RootUnavailable {
        path: root.to_path_buf(),
    })?;
    if !meta.is_dir() {
        return Err(DetectError::RootUnavailable {
            path: root.to_path_buf(),
        });
    }

    let mut snapshot = Snapshot::default();
    walk(root, "", filter, &mut snapshot)?;

    let mut creates = Vec::new();
    let mut changes = Vec::new();

    for (key, seen) in &snapshot.entries {
        match catalog.lookup(key) {
            None => {
                let record = FileRecord::new(key.clone(), seen.kind, seen.signature);
                creates.push(ChangeRecord::new(key, ChangeKind::Create, seen.kind, 1));
                catalog.upsert(record);
            }
            Some(prev) if prev.tombstone => {
                let mut record = prev.clone();
                record.version += 1;
                record.kind = seen.kind;
                record.signature = seen.signature;
                record.tombstone = false;
                record.tombstoned_at = None;
                creates.push(ChangeRecord::new(
                    key,
                    ChangeKind::Create,
                    seen.kind,
                    record.version,
                ));
                catalog.upsert(record);
            }
            Some(prev) if prev.kind != seen.kind || prev.signature != seen.signature => {
                let mut record = prev.clone();
                record.version += 1;
                record.kind = seen.kind;
                record.signature = seen.signature;
                changes.push(ChangeRecord::new(
                    key,
                    ChangeKind::Update,
                    seen.kind,
                    record.version,
                ));
                catalog.upsert(record);
            }
            Some(_) => {}
        }
    }

    let now = Utc::now();
    let mut deletes = Vec::new();
    let mut dropped = Vec::new();
    for record in catalog.records() {
        if record.tombstone || snapshot.entries.contains_key(&record.path) {
            continue;
        }
        if filter.excludes(&record.path, record.kind) {
            dropped.push(record.path.clone());
            continue;
        }
        if snapshot.is_unreadable(&record.path) {
            continue;
        }
        let mut gone = record.clone();
        gone.version += 1;
        gone.tombstone = true;
        gone.tombstoned_at = Some(now);
        deletes.push(gone);
    }
    for key in dropped {
        tracing::debug!(path = %key, "now excluded, dropping from catalog");
        catalog.purge(&key);
    }
    let deletes: Vec<ChangeRecord> = deletes
        .into_iter()
        .map(|gone| {
            let change = ChangeRecord::new(&gone.path, ChangeKind::Delete, gone.kind, gone.version);
            catalog.upsert(gone);
            change
        })
        .collect();

    let (renames, creates, deletes) = coalesce_renames(catalog, creates, deletes);
    changes.extend(creates);
    changes.extend(deletes);
    changes.extend(renames);
    changes.sort_by(|a, b| a.path.cmp(&b.path));

    tracing::debug!(
        root = %root.display(),
        scanned = snapshot.entries.len(),
        changes = changes.len(),
        "detect complete"
    );
    Ok(changes)
}

/// Records for catalog entries still ahead of their last-synced version that
/// `fresh` does not already cover.
pub fn outstanding(catalog: &ChangeCatalog, fresh: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let covered: HashSet<&str> = fresh
        .iter()
        .flat_map(|c| std::iter::once(c.path.as_str()).chain(c.old_path.as_deref()))
        .collect();

    catalog
        .pending()
        .into_iter()
        .filter(|r| !covered.contains(r.path.as_str()))
        .map(|r| {
            let kind = if r.tombstone {
                ChangeKind::Delete
            } else if r.synced_version == 0 {
                ChangeKind::Create
            } else {
                ChangeKind::Update
            };
            ChangeRecord::new(r.path, kind, r.kind, r.version)
        })
        .collect()
}

/// Fresh changes followed by retries, as one list sorted by path.
pub fn with_outstanding(catalog: &ChangeCatalog, fresh: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let retries = outstanding(catalog, &fresh);
    if !retries.is_empty() {
        tracing::debug!(retries = retries.len(), "re-queueing unsynced changes");
    }
    let mut all = fresh;
    all.extend(retries);
    all.sort_by(|a, b| a.path.cmp(&b.path));
    all
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

fn walk(dir: &Path, prefix: &str, filter: &FilterSet, out: &mut Snapshot) -> Result<(), DetectError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if prefix.is_empty() => {
            return Err(DetectError::Io {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "cannot list directory, keeping previous state");
            out.unreadable.push(prefix.to_string());
            return Ok(());
        }
    };

    let mut children: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let meta = match entry.path().symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %key, error = %e, "cannot stat entry, keeping previous state");
                out.unreadable.push(key);
                continue;
            }
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            tracing::trace!(path = %key, "skipping symlink");
        } else if file_type.is_dir() {
            if filter.is_excluded_dir(&key, &name) {
                tracing::trace!(path = %key, "excluded directory");
                continue;
            }
            out.entries.insert(
                key.clone(),
                Observed {
                    kind: EntryKind::Directory,
                    signature: None,
                },
            );
            walk(&entry.path(), &key, filter, out)?;
        } else if file_type.is_file() {
            if filter.is_excluded_file_name(&name) {
                tracing::trace!(path = %key, "excluded file");
                continue;
            }
            out.entries.insert(
                key,
                Observed {
                    kind: EntryKind::File,
                    signature: Some(Signature::from_metadata(&meta)),
                },
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rename coalescing
// ---------------------------------------------------------------------------

/// Pair file deletes with file creates carrying the identical signature.
/// Deletes are matched in path order against the first unmatched create.
fn coalesce_renames(
    catalog: &ChangeCatalog,
    creates: Vec<ChangeRecord>,
    deletes: Vec<ChangeRecord>,
) -> (Vec<ChangeRecord>, Vec<ChangeRecord>, Vec<ChangeRecord>) {
    let signature_of = |path: &str| catalog.lookup(path).and_then(|r| r.signature);

    let mut creates: Vec<Option<ChangeRecord>> = creates.into_iter().map(Some).collect();
    let mut renames = Vec::new();
    let mut unmatched = Vec::new();

    for delete in deletes {
        let target = match (delete.entry, signature_of(&delete.path)) {
            (EntryKind::File, Some(sig)) => creates.iter().position(|c| {
                c.as_ref().is_some_and(|c| {
                    c.entry == EntryKind::File && signature_of(&c.path) == Some(sig)
                })
            }),
            _ => None,
        };
        match target.and_then(|i| creates[i].take()) {
            Some(create) => {
                tracing::debug!(from = %delete.path, to = %create.path, "coalesced rename");
                renames.push(ChangeRecord::rename(
                    delete.path,
                    create.path,
                    EntryKind::File,
                    create.version,
                ));
            }
            None => unmatched.push(delete),
        }
    }

    (renames, creates.into_iter().flatten().collect(), unmatched)
}
