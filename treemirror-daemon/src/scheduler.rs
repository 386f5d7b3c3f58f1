//! The poll loop: detect both trees, replicate A→B then B→A, flush, sleep.
//!
//! ```text
//! Stopped ──start()──▶ Running ──stop()──▶ Stopping ──(cycle done)──▶ Stopped
//! ```
//!
//! One spawned task owns the loop. Each cycle's filesystem work runs on the
//! blocking pool, one cycle at a time. `stop()` never interrupts a cycle; it
//! interrupts the sleep between cycles and waits for the current cycle and
//! the final catalog flush to finish.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use treemirror_core::MirrorConfig;
use treemirror_sync::{run_cycle, CycleReport, FsLockProbe, LockProbe, MirrorPair};

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

/// Counters updated after every cycle.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SchedulerState>,
    stats: Mutex<SchedulerStats>,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SchedulerState) {
        *lock(&self.state) = state;
    }
}

/// A poisoned lock only means a cycle panicked mid-update; the data is still
/// usable for reporting.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle that asks a running scheduler to stop. Safe to use from
/// any task or thread, including signal handlers.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        if self.shared.state() == SchedulerState::Running {
            self.shared.set_state(SchedulerState::Stopping);
        }
        let _ = self.tx.send(true);
    }
}

pub struct SyncScheduler {
    config: MirrorConfig,
    probe: Arc<dyn LockProbe>,
    shared: Arc<Shared>,
    shutdown: Option<Arc<watch::Sender<bool>>>,
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
}

impl SyncScheduler {
    pub fn new(config: MirrorConfig) -> Self {
        Self::with_probe(config, Arc::new(FsLockProbe))
    }

    pub fn with_probe(config: MirrorConfig, probe: Arc<dyn LockProbe>) -> Self {
        Self {
            config,
            probe,
            shared: Arc::new(Shared::default()),
            shutdown: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.shared.stats).clone()
    }

    /// Validate the roots, load both catalogs, and spawn the loop. Must be
    /// called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        if self.state() != SchedulerState::Stopped {
            return Err(DaemonError::AlreadyRunning);
        }
        check_roots(&self.config)?;
        let pair = MirrorPair::open_with_probe(&self.config, self.probe.clone())?;
        log_startup(&self.config);

        let (tx, rx) = watch::channel(false);
        let shared = self.shared.clone();
        self.shared.set_state(SchedulerState::Running);
        self.handle = Some(tokio::spawn(run_loop(
            pair,
            self.config.clone(),
            self.probe.clone(),
            rx,
            shared,
        )));
        self.shutdown = Some(Arc::new(tx));
        Ok(())
    }

    /// Handle for stopping from another task. `None` unless running.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.shutdown.as_ref().map(|tx| StopHandle {
            tx: tx.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Signal the loop and wait for it to finish its current cycle and flush
    /// the catalogs.
    pub async fn stop(&mut self) -> Result<(), DaemonError> {
        let Some(handle) = self.handle.take() else {
            return Err(DaemonError::NotRunning);
        };
        tracing::info!("stopping main task...");
        if let Some(stop) = self.stop_handle() {
            stop.request_stop();
        }
        let joined = handle.await;
        self.shutdown = None;
        self.shared.set_state(SchedulerState::Stopped);
        match joined {
            Ok(result) => {
                tracing::info!("main task stopped");
                result
            }
            Err(err) => Err(DaemonError::Join {
                task: "scheduler",
                message: err.to_string(),
            }),
        }
    }
}

/// Both roots must be reachable directories before the loop may start.
pub fn check_roots(config: &MirrorConfig) -> Result<(), DaemonError> {
    config.validate()?;
    for root in [&config.path1, &config.path2] {
        if !root.is_dir() {
            return Err(DaemonError::Configuration(format!(
                "tree root '{}' is not reachable",
                root.display()
            )));
        }
    }
    Ok(())
}

/// One cycle outside the scheduler, for one-shot runs.
pub fn run_once(config: &MirrorConfig) -> Result<CycleReport, DaemonError> {
    check_roots(config)?;
    let mut pair = MirrorPair::open(config)?;
    Ok(run_cycle(&mut pair)?)
}

fn log_startup(config: &MirrorConfig) {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        path1 = %config.path1.display(),
        path2 = %config.path2.display(),
        interval_sec = config.check_interval_sec,
        "main task started"
    );
    log_filter("file", &config.excluded_files);
    log_filter("folder", &config.excluded_folders);
}

fn log_filter(kind: &str, list: &str) {
    if list.trim().is_empty() {
        tracing::info!("No {kind} filter specified");
    } else {
        tracing::info!(filter = %list, "{kind} filter");
    }
}

async fn run_loop(
    pair: MirrorPair,
    config: MirrorConfig,
    probe: Arc<dyn LockProbe>,
    mut shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
) -> Result<(), DaemonError> {
    let interval = config.interval();
    let mut slot = Some(pair);
    loop {
        if *shutdown.borrow() {
            break;
        }

        // A cycle that panicked took the pair with it; reload from disk.
        let pair = match slot.take() {
            Some(pair) => Some(pair),
            None => match MirrorPair::open_with_probe(&config, probe.clone()) {
                Ok(pair) => Some(pair),
                Err(err) => {
                    record_cycle(&shared, Err(err.into()), &config);
                    None
                }
            },
        };

        if let Some(mut pair) = pair {
            let joined = tokio::task::spawn_blocking(move || {
                let result = run_cycle(&mut pair);
                (pair, result)
            })
            .await;
            match joined {
                Ok((pair, result)) => {
                    record_cycle(&shared, result.map_err(DaemonError::from), &config);
                    slot = Some(pair);
                }
                Err(err) => record_cycle(
                    &shared,
                    Err(DaemonError::Join {
                        task: "cycle",
                        message: err.to_string(),
                    }),
                    &config,
                ),
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    if let Some(mut pair) = slot {
        tokio::task::spawn_blocking(move || pair.save())
            .await
            .map_err(|err| DaemonError::Join {
                task: "catalog flush",
                message: err.to_string(),
            })??;
    }
    Ok(())
}

fn record_cycle(shared: &Shared, result: Result<CycleReport, DaemonError>, config: &MirrorConfig) {
    let mut stats = lock(&shared.stats);
    stats.cycles += 1;
    match result {
        Ok(report) => {
            if report.failed() > 0 {
                tracing::warn!(failed = report.failed(), "cycle finished with failures");
            }
            stats.last_report = Some(report);
            stats.last_error = None;
        }
        Err(err) => {
            tracing::error!(
                path1 = %config.path1.display(),
                path2 = %config.path2.display(),
                error = %err,
                "cycle failed, retrying next interval"
            );
            stats.failed_cycles += 1;
            stats.last_error = Some(err.to_string());
        }
    }
}
