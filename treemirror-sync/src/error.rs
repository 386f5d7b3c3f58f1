//! Error types for treemirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use treemirror_core::CoreError;
use treemirror_detector::DetectError;

/// Errors from [`crate::copier`] operations.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The destination exists and overwrite was not requested.
    #[error("destination '{path}' already exists")]
    DestinationExists { path: PathBuf },

    #[error("source '{path}' does not exist")]
    SourceMissing { path: PathBuf },

    /// The source signature moved while its bytes were being staged. The
    /// staged copy was discarded.
    #[error("source '{path}' changed during copy")]
    SourceChanged { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All errors that can arise from replication and cycle operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Locked or permission-denied. Retried next cycle.
    #[error("'{path}' is locked or access was denied")]
    Access { path: PathBuf },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("copy error: {0}")]
    Copy(#[from] CopyError),

    /// Catalog load or save failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CoreError),

    #[error("detect error: {0}")]
    Detect(#[from] DetectError),
}

/// Convenience constructor for [`SyncError::Io`]. Permission denials become
/// [`SyncError::Access`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    let path = path.into();
    if source.kind() == std::io::ErrorKind::PermissionDenied {
        SyncError::Access { path }
    } else {
        SyncError::Io { path, source }
    }
}

pub(crate) fn copy_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CopyError {
    CopyError::Io {
        path: path.into(),
        source,
    }
}
