pub mod copy;
pub mod once;
pub mod run;
pub mod scan;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use treemirror_core::MirrorConfig;

/// Config file plus the flags that override its values.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Override `check_interval_sec`.
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Override `logger_verbosity` (1 = info, 2 = debug, 3 = trace).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub verbosity: Option<u8>,

    /// Override `state_dir`.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<MirrorConfig> {
        let mut config = MirrorConfig::load(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))?;
        if let Some(interval) = self.interval {
            config.check_interval_sec = interval;
        }
        if let Some(verbosity) = self.verbosity {
            config.logger_verbosity = verbosity;
        }
        if let Some(state_dir) = &self.state_dir {
            config.state_dir = Some(state_dir.clone());
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}
