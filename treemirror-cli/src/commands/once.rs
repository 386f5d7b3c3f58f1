//! `treemirror once`: a single full cycle.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use treemirror_sync::{CycleReport, SyncOutcome};

use super::ConfigArgs;

/// Arguments for `treemirror once`.
#[derive(Args, Debug)]
pub struct OnceArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PassRow {
    #[tabled(rename = "pass")]
    pass: String,
    #[tabled(rename = "considered")]
    considered: usize,
    #[tabled(rename = "applied")]
    applied: usize,
    #[tabled(rename = "skipped")]
    skipped: usize,
    #[tabled(rename = "failed")]
    failed: usize,
}

impl OnceArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.load()?;
        if !self.json {
            let log_file = treemirror_daemon::resolve_log_file(&config)?;
            treemirror_daemon::init_tracing(config.verbosity(), log_file);
        }
        let report = treemirror_daemon::run_once(&config).context("cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize cycle report")?
            );
        } else {
            print_report(&config.path1, &config.path2, &report);
        }
        if report.failed() > 0 {
            anyhow::bail!("{} item(s) failed to replicate", report.failed());
        }
        Ok(())
    }
}

fn print_report(path1: &Path, path2: &Path, report: &CycleReport) {
    let rows = vec![
        pass_row(format!("{} -> {}", path1.display(), path2.display()), &report.a_to_b),
        pass_row(format!("{} -> {}", path2.display(), path1.display()), &report.b_to_a),
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for outcome in [&report.a_to_b, &report.b_to_a] {
        for skipped in &outcome.skipped {
            println!("  {}  {} ({})", "~".yellow(), skipped.path, skipped.reason);
        }
        for failed in &outcome.failed {
            println!("  {}  {}: {}", "✗".red(), failed.path, failed.error);
        }
    }
    if report.purged_tombstones > 0 {
        println!("{} expired tombstone(s) dropped", report.purged_tombstones);
    }
    if report.failed() == 0 {
        println!("{} cycle complete", "✓".green());
    }
}

fn pass_row(pass: String, outcome: &SyncOutcome) -> PassRow {
    PassRow {
        pass,
        considered: outcome.considered,
        applied: outcome.applied,
        skipped: outcome.skipped.len(),
        failed: outcome.failed.len(),
    }
}
