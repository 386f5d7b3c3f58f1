//! treemirror: keep two directory trees mirrored by polling.
//!
//! # Usage
//!
//! ```text
//! treemirror run --config <file> [--interval <sec>] [--verbosity 1-3] [--state-dir <dir>]
//! treemirror once --config <file> [--json]
//! treemirror scan <root> [--exclude-files <list>] [--exclude-folders <list>] [--state-dir <dir>]
//! treemirror copy <source> <dest> [--overwrite] [--no-wait]
//! treemirror status --config <file> [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{copy::CopyArgs, once::OnceArgs, run::RunArgs, scan::ScanArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "treemirror",
    version,
    about = "Keep two directory trees mirrored by polling",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the mirror loop in the foreground until Ctrl-C or SIGTERM.
    Run(RunArgs),

    /// Run a single detect and replicate cycle, then exit.
    Once(OnceArgs),

    /// Detect changes in one tree and update its catalog without copying.
    Scan(ScanArgs),

    /// Bulk-copy a tree or file, e.g. to seed a new mirror.
    Copy(CopyArgs),

    /// Show catalog totals for both trees.
    Status(StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Once(args) => args.run(),
        Commands::Scan(args) => args.run(),
        Commands::Copy(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
