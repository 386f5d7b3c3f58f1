//! `treemirror run`: foreground mirror service.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::ConfigArgs;

/// Arguments for `treemirror run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = self.config.load()?;
        println!(
            "mirroring {} <-> {} every {}s (Ctrl-C to stop)",
            config.path1.display(),
            config.path2.display(),
            config.check_interval_sec
        );
        treemirror_daemon::start_blocking(config).context("mirror service failed")?;
        println!("{} treemirror stopped", "✓".green());
        Ok(())
    }
}
