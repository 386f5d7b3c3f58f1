use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LOGS_DIR: &str = "logs";
pub const DEFAULT_LOG_FILE: &str = "treemirror.log";

/// How often the log file size is checked against the rotation threshold.
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub fn logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(LOGS_DIR)
}

/// Absolute `log_file` values are used as given; relative ones live under
/// `<state_dir>/logs/`.
pub fn log_file_path(state_dir: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        logs_dir(state_dir).join(configured)
    }
}
