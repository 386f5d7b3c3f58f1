//! Polling scheduler and console-service runtime for treemirror.

mod error;
pub mod log_rotation;
pub mod paths;
mod runtime;
mod scheduler;

pub use error::DaemonError;
pub use runtime::{filter_directive, init_tracing, resolve_log_file, run, start_blocking};
pub use scheduler::{
    check_roots, run_once, SchedulerState, SchedulerStats, StopHandle, SyncScheduler,
};
