//! treemirror core library: domain types, filters, configuration, catalog
//! persistence, errors.
//!
//! - [`types`]: file/change records and path helpers
//! - [`filter`]: [`FilterSet`]
//! - [`config`]: [`MirrorConfig`] YAML loading and validation
//! - [`catalog`]: [`ChangeCatalog`] per-tree persistence
//! - [`error`]: [`CoreError`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod types;

pub use catalog::ChangeCatalog;
pub use config::MirrorConfig;
pub use error::CoreError;
pub use filter::FilterSet;
pub use types::{
    ChangeKind, ChangeRecord, EntryKind, FileRecord, Signature, WaitPolicy, STAGING_SUFFIX,
};
