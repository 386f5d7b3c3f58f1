use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the scheduler and the service runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Unusable configuration or an unreachable tree root at startup. Fatal:
    /// the scheduler never enters `Running`.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Core(#[from] treemirror_core::CoreError),

    #[error("sync error: {0}")]
    Sync(#[from] treemirror_sync::SyncError),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
