//! `treemirror copy`: bulk mirror of a file or tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use treemirror_core::WaitPolicy;
use treemirror_sync::{CopyOptions, FsLockProbe, TreeCopier};

/// Arguments for `treemirror copy`.
#[derive(Args, Debug)]
pub struct CopyArgs {
    /// File or directory to copy from.
    pub source: PathBuf,

    /// Destination path.
    pub dest: PathBuf,

    /// Replace files that already exist at the destination.
    #[arg(long)]
    pub overwrite: bool,

    /// Copy immediately instead of waiting for locked files to be released.
    #[arg(long)]
    pub no_wait: bool,
}

impl CopyArgs {
    pub fn run(self) -> Result<()> {
        treemirror_daemon::init_tracing(1, None);
        let options = CopyOptions {
            overwrite: self.overwrite,
            wait: (!self.no_wait).then(WaitPolicy::default),
        };
        let probe = FsLockProbe;
        let report = TreeCopier::new(&probe, options)
            .copy(&self.source, &self.dest)
            .with_context(|| {
                format!(
                    "copy {} -> {} failed",
                    self.source.display(),
                    self.dest.display()
                )
            })?;

        println!(
            "{} {} -> {} ({} copied, {} skipped, {} failed)",
            "✓".green(),
            self.source.display(),
            self.dest.display(),
            report.copied,
            report.skipped,
            report.failed
        );
        if report.failed > 0 {
            anyhow::bail!("{} file(s) could not be copied", report.failed);
        }
        Ok(())
    }
}
