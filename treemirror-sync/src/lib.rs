//! # treemirror-sync
//!
//! Lock probing, staged tree copies, and one-way replication between two
//! mirrored trees.
//!
//! Call [`run_cycle`] on a [`MirrorPair`] for one full detect → replicate →
//! flush cycle, or drive [`ReplicationEngine`] directly for a single pass.

pub mod copier;
pub mod engine;
pub mod error;
pub mod lock_probe;
pub mod pipeline;
pub mod recycle;

pub use copier::{CopyOptions, CopyReport, TreeCopier};
pub use engine::{PassMode, ReplicationEngine, SkipReason, SyncOutcome};
pub use error::{CopyError, SyncError};
pub use lock_probe::{FsLockProbe, LockProbe};
pub use pipeline::{run_cycle, CycleReport, MirrorPair};
pub use recycle::RecycleBin;
