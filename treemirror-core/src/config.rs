//! Mirror configuration, loaded from a YAML file.
//!
//! ```yaml
//! path1: /srv/share/projects
//! path2: //nas/backup/projects
//! check_interval_sec: 60
//! excluded_files: "*.tmp,~$*"
//! excluded_folders: "node_modules,.git"
//! logger_verbosity: 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::filter::FilterSet;
use crate::types::WaitPolicy;

pub const DEFAULT_CHECK_INTERVAL_SEC: u64 = 60;
pub const DEFAULT_TOMBSTONE_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_LOCK_WAIT_ATTEMPTS: u32 = 10;
pub const DEFAULT_LOCK_WAIT_INTERVAL_MS: u64 = 1000;

/// Name of the default state directory under `$HOME`.
pub const STATE_DIR_NAME: &str = ".treemirror";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(alias = "Path1")]
    pub path1: PathBuf,
    #[serde(alias = "Path2")]
    pub path2: PathBuf,
    #[serde(default = "default_interval", alias = "CheckIntervalSec")]
    pub check_interval_sec: u64,
    #[serde(default, alias = "ExcludedFiles")]
    pub excluded_files: String,
    #[serde(default, alias = "ExcludedFolders")]
    pub excluded_folders: String,
    #[serde(default = "default_verbosity", alias = "LoggerVerbosity")]
    pub logger_verbosity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_retention")]
    pub tombstone_retention_days: u32,
    #[serde(default = "default_lock_attempts")]
    pub lock_wait_attempts: u32,
    #[serde(default = "default_lock_interval")]
    pub lock_wait_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Move deleted and overwritten files into `<state_dir>/recycle/`
    /// instead of destroying them.
    #[serde(default = "default_recycle", alias = "RecycleDeletedFiles")]
    pub recycle_deleted_files: bool,
}

fn default_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SEC
}

fn default_verbosity() -> u8 {
    1
}

fn default_retention() -> u32 {
    DEFAULT_TOMBSTONE_RETENTION_DAYS
}

fn default_lock_attempts() -> u32 {
    DEFAULT_LOCK_WAIT_ATTEMPTS
}

fn default_lock_interval() -> u64 {
    DEFAULT_LOCK_WAIT_INTERVAL_MS
}

fn default_recycle() -> bool {
    true
}

impl MirrorConfig {
    /// Config with default tuning for the given pair of roots.
    pub fn new(path1: impl Into<PathBuf>, path2: impl Into<PathBuf>) -> Self {
        Self {
            path1: path1.into(),
            path2: path2.into(),
            check_interval_sec: DEFAULT_CHECK_INTERVAL_SEC,
            excluded_files: String::new(),
            excluded_folders: String::new(),
            logger_verbosity: default_verbosity(),
            state_dir: None,
            tombstone_retention_days: DEFAULT_TOMBSTONE_RETENTION_DAYS,
            lock_wait_attempts: DEFAULT_LOCK_WAIT_ATTEMPTS,
            lock_wait_interval_ms: DEFAULT_LOCK_WAIT_INTERVAL_MS,
            log_file: None,
            recycle_deleted_files: default_recycle(),
        }
    }

    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let config: MirrorConfig =
            serde_yaml::from_str(&contents).map_err(|source| CoreError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Static checks that do not touch the filesystem beyond canonicalising
    /// roots that already exist. Reachability is checked at scheduler start.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.path1.as_os_str().is_empty() || self.path2.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig(
                "path1 and path2 must both be set".into(),
            ));
        }
        if self.check_interval_sec == 0 {
            return Err(CoreError::InvalidConfig(
                "check_interval_sec must be greater than zero".into(),
            ));
        }
        let a = normalise(&self.path1);
        let b = normalise(&self.path2);
        if a == b {
            return Err(CoreError::InvalidConfig(format!(
                "path1 and path2 refer to the same directory: {}",
                a.display()
            )));
        }
        if a.starts_with(&b) || b.starts_with(&a) {
            return Err(CoreError::InvalidConfig(format!(
                "mirrored roots must not be nested: {} and {}",
                a.display(),
                b.display()
            )));
        }
        // The default `~/.treemirror` counts too. Without a home directory
        // there is no default to check; opening the catalogs reports that.
        if let Ok(state) = self.state_dir() {
            let state = normalise_ancestors(&state);
            if state.starts_with(&a) || state.starts_with(&b) {
                return Err(CoreError::InvalidConfig(format!(
                    "state_dir {} must not live inside a mirrored tree",
                    state.display()
                )));
            }
        }
        self.filter_set().map(|_| ())
    }

    pub fn filter_set(&self) -> Result<FilterSet, CoreError> {
        FilterSet::from_lists(&self.excluded_files, &self.excluded_folders)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_sec)
    }

    /// Verbosity clamped to 1..=3.
    pub fn verbosity(&self) -> u8 {
        self.logger_verbosity.clamp(1, 3)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            max_attempts: self.lock_wait_attempts,
            interval: Duration::from_millis(self.lock_wait_interval_ms),
        }
    }

    pub fn tombstone_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.tombstone_retention_days))
    }

    /// Configured state directory, or `~/.treemirror`.
    pub fn state_dir(&self) -> Result<PathBuf, CoreError> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_state_dir(),
        }
    }
}

/// `~/.treemirror`
pub fn default_state_dir() -> Result<PathBuf, CoreError> {
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .ok_or(CoreError::HomeNotFound)
}

/// Canonical form when the path exists, otherwise the path as given.
pub fn normalise(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Like [`normalise`], but canonicalises the deepest existing ancestor of a
/// path that does not exist yet.
fn normalise_ancestors(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = std::fs::canonicalize(current) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
