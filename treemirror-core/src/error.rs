//! Error types for treemirror-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration, filter, and catalog operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on config load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The persisted catalog could not be decoded.
    #[error("catalog at {path} is corrupt: {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (catalog save path).
    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An excluded-file pattern did not compile.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Configuration values are present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `dirs::home_dir()` returned `None` and no `state_dir` was configured.
    #[error("cannot determine home directory; set $HOME or configure state_dir")]
    HomeNotFound,
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
