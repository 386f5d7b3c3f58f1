//! Domain types shared by the detector, the replication engine, and the daemon.
//!
//! Relative paths are always `/`-separated strings, independent of the host
//! platform, so that a catalog written on one machine keys the same paths as
//! the peer tree's catalog.

use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::{Deserialize, Serialize};

/// Suffix of the staging file a copy is written to before being renamed into
/// place. Paths carrying it are never tracked.
pub const STAGING_SUFFIX: &str = ".treemirror.tmp";

// ---------------------------------------------------------------------------
// Entry kinds and signatures
// ---------------------------------------------------------------------------

/// Whether a tracked path is a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

/// Cheap content identity: size plus last-modified time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub size: u64,
    pub modified_secs: i64,
    pub modified_nanos: u32,
}

impl Signature {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime = FileTime::from_last_modification_time(meta);
        Self {
            size: meta.len(),
            modified_secs: mtime.unix_seconds(),
            modified_nanos: mtime.nanoseconds(),
        }
    }

    pub fn modified(&self) -> FileTime {
        FileTime::from_unix_time(self.modified_secs, self.modified_nanos)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}B@{}.{:09}",
            self.size, self.modified_secs, self.modified_nanos
        )
    }
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

/// Last-known state of one path inside a tree root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub kind: EntryKind,
    /// `None` for directories. Tombstones keep the last live signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    pub version: u64,
    #[serde(default)]
    pub synced_version: u64,
    #[serde(default)]
    pub tombstone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// A freshly observed path at version 1, not yet propagated.
    pub fn new(path: impl Into<String>, kind: EntryKind, signature: Option<Signature>) -> Self {
        Self {
            path: path.into(),
            kind,
            signature,
            version: 1,
            synced_version: 0,
            tombstone: false,
            tombstoned_at: None,
        }
    }

    /// The record has a change the peer tree has not received yet.
    pub fn is_pending(&self) -> bool {
        self.version > self.synced_version
    }

    /// Live record with a content change pending (not a pending deletion).
    pub fn has_pending_content(&self) -> bool {
        self.is_pending() && !self.tombstone
    }
}

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Rename,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "CREATE"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
            ChangeKind::Rename => write!(f, "RENAME"),
        }
    }
}

/// One change observed in a tree, valid for a single detect → replicate cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    pub entry: EntryKind,
    /// Previous location, set for [`ChangeKind::Rename`] only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Catalog version of `path` that produced this change.
    pub version: u64,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, kind: ChangeKind, entry: EntryKind, version: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            entry,
            old_path: None,
            version,
        }
    }

    pub fn rename(
        old_path: impl Into<String>,
        path: impl Into<String>,
        entry: EntryKind,
        version: u64,
    ) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Rename,
            entry,
            old_path: Some(old_path.into()),
            version,
        }
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(f, "{} {} -> {} (v{})", self.kind, old, self.path, self.version),
            None => write!(f, "{} {} (v{})", self.kind, self.path, self.version),
        }
    }
}

// ---------------------------------------------------------------------------
// Lock waiting
// ---------------------------------------------------------------------------

/// How long to wait for a busy file before giving up on it for now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl WaitPolicy {
    /// Probe once, never sleep.
    pub const fn no_wait() -> Self {
        Self {
            max_attempts: 0,
            interval: Duration::ZERO,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `/`-joined relative path of `path` under `root`, or `None` when `path` is
/// not inside `root` or is the root itself.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a `/`-separated relative key against a tree root.
pub fn resolve(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// `true` when `key` is `prefix` itself or lives underneath it.
pub fn is_under(key: &str, prefix: &str) -> bool {
    key == prefix
        || (key.len() > prefix.len()
            && key.starts_with(prefix)
            && key.as_bytes()[prefix.len()] == b'/')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_key_uses_forward_slashes() {
        let root = Path::new("/data/tree");
        let path = root.join("a").join("b").join("c.txt");
        assert_eq!(relative_key(root, &path).as_deref(), Some("a/b/c.txt"));
        assert_eq!(relative_key(root, root), None);
        assert_eq!(relative_key(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn resolve_inverts_relative_key() {
        let root = Path::new("/data/tree");
        let path = resolve(root, "a/b/c.txt");
        assert_eq!(path, root.join("a").join("b").join("c.txt"));
    }

    #[test]
    fn is_under_respects_component_boundaries() {
        assert!(is_under("docs", "docs"));
        assert!(is_under("docs/a.txt", "docs"));
        assert!(!is_under("docs2/a.txt", "docs"));
        assert!(!is_under("doc", "docs"));
    }

    #[test]
    fn pending_tracks_version_gap() {
        let mut record = FileRecord::new("a.txt", EntryKind::File, None);
        assert!(record.is_pending());
        assert!(record.has_pending_content());
        record.synced_version = record.version;
        assert!(!record.is_pending());
        record.version += 1;
        record.tombstone = true;
        assert!(record.is_pending());
        assert!(!record.has_pending_content());
    }

    #[test]
    fn change_record_display() {
        let create = ChangeRecord::new("x.txt", ChangeKind::Create, EntryKind::File, 1);
        assert_eq!(create.to_string(), "CREATE x.txt (v1)");
        let rename = ChangeRecord::rename("a.txt", "b.txt", EntryKind::File, 1);
        assert_eq!(rename.to_string(), "RENAME a.txt -> b.txt (v1)");
    }
}
