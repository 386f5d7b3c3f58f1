//! Shared cycle entrypoint used by the CLI and the daemon scheduler.
//!
//! One cycle: detect A, detect B, replicate A→B (yielding on conflicts),
//! replicate B→A (overwriting on conflicts), purge expired tombstones, flush
//! both catalogs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use treemirror_core::{ChangeCatalog, FilterSet, MirrorConfig, WaitPolicy};
use treemirror_detector::{detect, with_outstanding};

use crate::engine::{PassMode, ReplicationEngine, SyncOutcome};
use crate::error::SyncError;
use crate::lock_probe::{FsLockProbe, LockProbe};

/// Everything one cycle needs, owned so it can move onto a blocking thread.
pub struct MirrorPair {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub catalog_a: ChangeCatalog,
    pub catalog_b: ChangeCatalog,
    pub filter: FilterSet,
    pub probe: Arc<dyn LockProbe>,
    pub wait: WaitPolicy,
    pub retention: chrono::Duration,
    /// State directory holding the recycle bins; `None` deletes for good.
    pub recycle_dir: Option<PathBuf>,
}

/// Outcome of both passes of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub a_to_b: SyncOutcome,
    pub b_to_a: SyncOutcome,
    pub purged_tombstones: usize,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.a_to_b.failed.len() + self.b_to_a.failed.len()
    }
}

impl MirrorPair {
    /// Load both catalogs from the configured state directory and probe the
    /// filesystem for locks.
    pub fn open(config: &MirrorConfig) -> Result<Self, SyncError> {
        Self::open_with_probe(config, Arc::new(FsLockProbe))
    }

    pub fn open_with_probe(
        config: &MirrorConfig,
        probe: Arc<dyn LockProbe>,
    ) -> Result<Self, SyncError> {
        let state_dir = config.state_dir()?;
        Ok(Self {
            catalog_a: ChangeCatalog::open_at(&state_dir, &config.path1)?,
            catalog_b: ChangeCatalog::open_at(&state_dir, &config.path2)?,
            root_a: config.path1.clone(),
            root_b: config.path2.clone(),
            filter: config.filter_set()?,
            probe,
            wait: config.wait_policy(),
            retention: config.tombstone_retention(),
            recycle_dir: config.recycle_deleted_files.then(|| state_dir.clone()),
        })
    }

    pub fn save(&mut self) -> Result<(), SyncError> {
        self.catalog_a.save()?;
        self.catalog_b.save()?;
        Ok(())
    }
}

/// Run one full detect → replicate → flush cycle.
pub fn run_cycle(pair: &mut MirrorPair) -> Result<CycleReport, SyncError> {
    let fresh_a = detect(&pair.root_a, &pair.filter, &mut pair.catalog_a)?;
    let fresh_b = detect(&pair.root_b, &pair.filter, &mut pair.catalog_b)?;
    let changes_a = with_outstanding(&pair.catalog_a, fresh_a);
    let changes_b = with_outstanding(&pair.catalog_b, fresh_b);

    let mut engine = ReplicationEngine::new(pair.probe.as_ref(), pair.wait);
    if let Some(state_dir) = &pair.recycle_dir {
        engine = engine.with_recycling(state_dir);
    }
    let a_to_b = engine.replicate_one_way(
        &changes_a,
        &pair.root_a,
        &pair.root_b,
        &mut pair.catalog_a,
        &mut pair.catalog_b,
        PassMode::Yield,
    );
    log_pass(&pair.root_b, &a_to_b);
    let b_to_a = engine.replicate_one_way(
        &changes_b,
        &pair.root_b,
        &pair.root_a,
        &mut pair.catalog_b,
        &mut pair.catalog_a,
        PassMode::Overwrite,
    );
    log_pass(&pair.root_a, &b_to_a);

    let now = Utc::now();
    let purged = pair.catalog_a.purge_expired_tombstones(pair.retention, now).len()
        + pair.catalog_b.purge_expired_tombstones(pair.retention, now).len();
    if purged > 0 {
        tracing::info!(purged, "expired tombstones dropped");
    }

    pair.save()?;
    Ok(CycleReport {
        a_to_b,
        b_to_a,
        purged_tombstones: purged,
    })
}

fn log_pass(dest: &Path, outcome: &SyncOutcome) {
    if outcome.considered == 0 {
        return;
    }
    tracing::info!(
        dest = %dest.display(),
        total = outcome.considered,
        applied = outcome.applied,
        skipped = outcome.skipped.len(),
        failed = outcome.failed.len(),
        "synchronizing '{}'",
        dest.display()
    );
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn pair_in(state: &TempDir, a: &TempDir, b: &TempDir) -> MirrorPair {
        let mut config = MirrorConfig::new(a.path(), b.path());
        config.state_dir = Some(state.path().to_path_buf());
        MirrorPair::open(&config).expect("open pair")
    }

    #[test]
    fn single_file_reaches_peer_in_one_cycle() {
        let (state, a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::write(a.path().join("x.txt"), "x").unwrap();
        let mut pair = pair_in(&state, &a, &b);

        let report = run_cycle(&mut pair).expect("cycle");
        assert_eq!(report.a_to_b.applied, 1);
        assert_eq!(report.b_to_a.considered, 0);
        assert_eq!(fs::read_to_string(b.path().join("x.txt")).unwrap(), "x");

        let again = run_cycle(&mut pair).expect("second cycle");
        assert_eq!(again, CycleReport::default());
    }

    #[test]
    fn catalogs_are_flushed_and_reloadable() {
        let (state, a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::write(a.path().join("x.txt"), "x").unwrap();
        let mut pair = pair_in(&state, &a, &b);
        run_cycle(&mut pair).expect("cycle");
        drop(pair);

        let mut reopened = pair_in(&state, &a, &b);
        assert!(reopened.catalog_a.lookup("x.txt").is_some());
        assert!(reopened.catalog_b.lookup("x.txt").is_some());
        let report = run_cycle(&mut reopened).expect("cycle after reload");
        assert_eq!(report.a_to_b.considered + report.b_to_a.considered, 0);
    }

    #[test]
    fn unreachable_root_fails_the_cycle() {
        let (state, a, b) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
        let mut pair = pair_in(&state, &a, &b);
        pair.root_b = b.path().join("unmounted");
        let err = run_cycle(&mut pair).unwrap_err();
        assert!(matches!(err, SyncError::Detect(_)), "got: {err}");
    }
}
