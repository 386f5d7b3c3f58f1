//! Per-tree persistent change catalog.
//!
//! # Storage layout
//!
//! ```text
//! <state_dir>/
//!   catalogs/
//!     <digest of canonical root>.json
//! ```
//!
//! One catalog per tree root, mutated only by that tree's detector and by the
//! replication passes. Writes use the atomic `.tmp` + rename pattern and only
//! happen when the in-memory state is dirty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::normalise;
use crate::error::{io_err, CoreError};
use crate::types::{is_under, FileRecord};

/// On-disk catalog payload.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    root: PathBuf,
    saved_at: DateTime<Utc>,
    records: BTreeMap<String, FileRecord>,
}

#[derive(Debug, Clone)]
pub struct ChangeCatalog {
    root: PathBuf,
    /// `None` for a catalog that never touches disk.
    path: Option<PathBuf>,
    records: BTreeMap<String, FileRecord>,
    dirty: bool,
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<state_dir>/catalogs/<digest>.json`, pure, no I/O beyond canonicalising
/// the root when it exists.
pub fn catalog_path_at(state_dir: &Path, root: &Path) -> PathBuf {
    state_dir
        .join("catalogs")
        .join(format!("{}.json", tree_digest(root)))
}

/// Stable short name for a tree root: hex of the first 16 bytes of the
/// SHA-256 of its canonical path.
pub fn tree_digest(root: &Path) -> String {
    let canonical = normalise(root);
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    hex::encode(&digest[..16])
}

// ---------------------------------------------------------------------------
// 2. Load / save
// ---------------------------------------------------------------------------

impl ChangeCatalog {
    /// Open the catalog for `root` under `state_dir`.
    ///
    /// Returns an empty catalog if the file does not yet exist,
    /// `CoreError::CatalogParse` if it is malformed.
    pub fn open_at(state_dir: &Path, root: &Path) -> Result<Self, CoreError> {
        let path = catalog_path_at(state_dir, root);
        let root = normalise(root);
        if !path.exists() {
            tracing::debug!(root = %root.display(), catalog = %path.display(), "starting empty catalog");
            return Ok(Self {
                root,
                path: Some(path),
                records: BTreeMap::new(),
                dirty: false,
            });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let file: CatalogFile =
            serde_json::from_str(&contents).map_err(|source| CoreError::CatalogParse {
                path: path.clone(),
                source,
            })?;
        if file.root != root {
            tracing::warn!(
                expected = %root.display(),
                found = %file.root.display(),
                "catalog root mismatch, starting empty"
            );
            return Ok(Self {
                root,
                path: Some(path),
                records: BTreeMap::new(),
                dirty: true,
            });
        }
        tracing::debug!(root = %root.display(), records = file.records.len(), "catalog loaded");
        Ok(Self {
            root,
            path: Some(path),
            records: file.records,
            dirty: false,
        })
    }

    /// Catalog with no backing file. `save` is a no-op.
    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path: None,
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Persist if dirty. Writes `<path>.tmp` then renames to `<path>`.
    pub fn save(&mut self) -> Result<(), CoreError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.as_deref() else {
            self.dirty = false;
            return Ok(());
        };
        let Some(dir) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("invalid catalog path")));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let file = CatalogFile {
            root: self.root.clone(),
            saved_at: Utc::now(),
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }
        tracing::trace!(catalog = %path.display(), records = self.records.len(), "catalog saved");
        self.dirty = false;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // -----------------------------------------------------------------------
    // 3. Record operations
    // -----------------------------------------------------------------------

    pub fn lookup(&self, rel: &str) -> Option<&FileRecord> {
        self.records.get(rel)
    }

    /// Insert or replace the record keyed by `record.path`.
    pub fn upsert(&mut self, record: FileRecord) {
        if self.records.get(&record.path) != Some(&record) {
            self.records.insert(record.path.clone(), record);
            self.dirty = true;
        }
    }

    /// Record that `version` of `rel` has reached the peer tree. Never moves
    /// the synced marker backwards. Returns `false` if `rel` is untracked.
    pub fn mark_synced(&mut self, rel: &str, version: u64) -> bool {
        match self.records.get_mut(rel) {
            Some(record) => {
                if version > record.synced_version {
                    record.synced_version = version.min(record.version);
                    self.dirty = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn purge(&mut self, rel: &str) -> Option<FileRecord> {
        let removed = self.records.remove(rel);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop `prefix` and every record beneath it. Returns the number removed.
    pub fn purge_under(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| is_under(key, prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.records.remove(key);
        }
        if !keys.is_empty() {
            self.dirty = true;
        }
        keys.len()
    }

    /// All tracked records in key order.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn tombstones(&self) -> Vec<FileRecord> {
        self.records.values().filter(|r| r.tombstone).cloned().collect()
    }

    /// Records whose version is ahead of their last-synced version.
    pub fn pending(&self) -> Vec<FileRecord> {
        self.records.values().filter(|r| r.is_pending()).cloned().collect()
    }

    /// `true` if `prefix` or anything beneath it has an unsynced live change.
    pub fn has_pending_under(&self, prefix: &str) -> bool {
        self.records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .any(|(key, record)| is_under(key, prefix) && record.has_pending_content())
    }

    /// Drop tombstones older than `retention`, whether or not the peer has
    /// confirmed them. Returns the purged keys.
    pub fn purge_expired_tombstones(
        &mut self,
        retention: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|r| r.tombstone)
            .filter(|r| r.tombstoned_at.is_some_and(|at| now - at >= retention))
            .map(|r| r.path.clone())
            .collect();
        for key in &expired {
            self.records.remove(key);
        }
        if !expired.is_empty() {
            self.dirty = true;
        }
        expired
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
