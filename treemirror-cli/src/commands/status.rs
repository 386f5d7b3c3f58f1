//! `treemirror status`: catalog totals per tree.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use treemirror_core::{ChangeCatalog, MirrorConfig};

use super::ConfigArgs;

/// Arguments for `treemirror status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct TreeStatus {
    #[tabled(rename = "tree")]
    root: String,
    #[tabled(rename = "tracked")]
    tracked: usize,
    #[tabled(rename = "pending")]
    pending: usize,
    #[tabled(rename = "tombstones")]
    tombstones: usize,
    #[tabled(rename = "reachable")]
    reachable: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.load()?;
        let trees = build_report(&config)?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&trees).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        println!(
            "treemirror v{} | every {}s",
            env!("CARGO_PKG_VERSION"),
            config.check_interval_sec
        );
        let pending: usize = trees.iter().map(|t| t.pending).sum();
        let unreachable = trees.iter().filter(|t| !t.reachable).count();
        let mut table = Table::new(trees.clone());
        table.with(Style::rounded());
        println!("{table}");

        if unreachable > 0 {
            println!("{} {unreachable} tree root(s) unreachable", "✗".red());
        } else if pending > 0 {
            println!("{} {pending} change(s) waiting to replicate", "~".yellow());
        } else {
            println!("{} trees in sync", "✓".green());
        }
        Ok(())
    }
}

fn build_report(config: &MirrorConfig) -> Result<Vec<TreeStatus>> {
    let state_dir = config.state_dir()?;
    [&config.path1, &config.path2]
        .into_iter()
        .map(|root| tree_status(&state_dir, root))
        .collect()
}

fn tree_status(state_dir: &Path, root: &Path) -> Result<TreeStatus> {
    let catalog = ChangeCatalog::open_at(state_dir, root)
        .with_context(|| format!("failed to load catalog for {}", root.display()))?;
    Ok(TreeStatus {
        root: root.display().to_string(),
        tracked: catalog.records().filter(|r| !r.tombstone).count(),
        pending: catalog.pending().len(),
        tombstones: catalog.tombstones().len(),
        reachable: root.is_dir(),
    })
}
