//! `treemirror scan`: detect-only pass over one tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use treemirror_core::{config::default_state_dir, ChangeCatalog, ChangeKind, FilterSet};

/// Arguments for `treemirror scan`.
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Tree root to scan.
    pub root: PathBuf,

    /// Comma-separated file name patterns to ignore.
    #[arg(long, default_value = "")]
    pub exclude_files: String,

    /// Comma-separated folder names to ignore.
    #[arg(long, default_value = "")]
    pub exclude_folders: String,

    /// Directory holding the catalogs (default `~/.treemirror`).
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

impl ScanArgs {
    pub fn run(self) -> Result<()> {
        treemirror_daemon::init_tracing(1, None);
        let filter = FilterSet::from_lists(&self.exclude_files, &self.exclude_folders)
            .context("invalid exclusion pattern")?;
        let state_dir = match self.state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        let mut catalog = ChangeCatalog::open_at(&state_dir, &self.root)
            .with_context(|| format!("failed to open catalog for {}", self.root.display()))?;

        let changes = treemirror_detector::detect(&self.root, &filter, &mut catalog)
            .with_context(|| format!("scan failed for {}", self.root.display()))?;
        catalog.save().context("failed to save catalog")?;
        if let Some(path) = catalog.path() {
            println!("catalog: {}", path.display());
        }

        if changes.is_empty() {
            println!("{} '{}': no changes", "✓".green(), self.root.display());
            return Ok(());
        }
        println!(
            "{} '{}': {} change(s), {} tracked",
            "✓".green(),
            self.root.display(),
            changes.len(),
            catalog.len()
        );
        for change in &changes {
            let glyph = match change.kind {
                ChangeKind::Create => "+".green(),
                ChangeKind::Update => "✎".yellow(),
                ChangeKind::Delete => "-".red(),
                ChangeKind::Rename => "→".cyan(),
            };
            println!("  {glyph}  {change}");
        }
        Ok(())
    }
}
