//! Exclusion rules applied identically to both trees.
//!
//! File patterns are globs matched case-insensitively against the file name
//! (`*.tmp`, `~$*`, `Thumbs.db`). Folder entries are directory names matched
//! case-insensitively against any component of a path; an entry containing
//! `/` is instead a relative path prefix (`build/cache`).

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::CoreError;
use crate::types::{is_under, EntryKind, STAGING_SUFFIX};

/// Immutable set of file-name globs and excluded subdirectory names.
#[derive(Debug, Clone)]
pub struct FilterSet {
    files: GlobSet,
    file_patterns: Vec<String>,
    folders: Vec<String>,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl FilterSet {
    /// A filter that excludes nothing except in-flight staging files.
    pub fn empty() -> Self {
        Self {
            files: GlobSet::empty(),
            file_patterns: Vec::new(),
            folders: Vec::new(),
        }
    }

    pub fn new<F, D, S, T>(file_patterns: F, folders: D) -> Result<Self, CoreError>
    where
        F: IntoIterator<Item = S>,
        D: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();
        for pattern in file_patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|source| CoreError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
            patterns.push(pattern.to_string());
        }
        let files = builder.build().map_err(|source| CoreError::Pattern {
            pattern: patterns.join(","),
            source,
        })?;

        let folders = folders
            .into_iter()
            .map(|f| f.as_ref().trim().trim_matches('/').to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();

        Ok(Self {
            files,
            file_patterns: patterns,
            folders,
        })
    }

    /// Build from the comma-separated lists used in configuration files.
    pub fn from_lists(excluded_files: &str, excluded_folders: &str) -> Result<Self, CoreError> {
        Self::new(split_list(excluded_files), split_list(excluded_folders))
    }

    pub fn file_patterns(&self) -> &[String] {
        &self.file_patterns
    }

    pub fn folder_names(&self) -> &[String] {
        &self.folders
    }

    /// `true` when a file named `name` is excluded by a file pattern.
    pub fn is_excluded_file_name(&self, name: &str) -> bool {
        name.ends_with(STAGING_SUFFIX) || self.files.is_match(name)
    }

    /// `true` when the directory at relative key `rel` (last component
    /// `name`) is excluded. Excluded directories are not descended into.
    pub fn is_excluded_dir(&self, rel: &str, name: &str) -> bool {
        let name = name.to_lowercase();
        let rel = rel.to_lowercase();
        self.folders.iter().any(|folder| {
            if folder.contains('/') {
                is_under(&rel, folder)
            } else {
                *folder == name
            }
        })
    }

    /// Full check for a relative key: the entry itself and each ancestor
    /// directory.
    pub fn excludes(&self, rel: &str, kind: EntryKind) -> bool {
        let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();
        let Some((last, ancestors)) = parts.split_last() else {
            return false;
        };
        let mut prefix = String::new();
        for dir in ancestors {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(dir);
            if self.is_excluded_dir(&prefix, dir) {
                return true;
            }
        }
        match kind {
            EntryKind::File => self.is_excluded_file_name(last),
            EntryKind::Directory => self.is_excluded_dir(rel, last),
        }
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}
