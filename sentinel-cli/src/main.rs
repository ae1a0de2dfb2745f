//! Sentinel: keep declared watch records in sync with the filesystem.
//!
//! # Usage
//!
//! ```text
//! sentinel watch add <ns/name> --path <abs> [--recursive]
//! sentinel watch list [--namespace <ns>] [--json]
//! sentinel watch show <ns/name>
//! sentinel watch remove <ns/name>
//! sentinel scan <path> [--recursive] [--json]
//! sentinel diff <ns/name>
//! sentinel reconcile [--once]
//! sentinel daemon start|stop|status
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, diff::DiffArgs, reconcile::ReconcileArgs, scan::ScanArgs,
    watch::WatchCommand, Context,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "sentinel",
    version,
    about = "Reconcile declared watch records against live filesystem metadata",
    long_about = None,
)]
struct Cli {
    /// Record store directory (defaults to ~/.sentinel/records).
    #[arg(long, global = true, env = "SENTINEL_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage watch records.
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },

    /// Print the metadata snapshot of a path without touching any record.
    Scan(ScanArgs),

    /// Show what the next reconcile would change for a record.
    Diff(DiffArgs),

    /// Run the reconciliation loop in the foreground.
    Reconcile(ReconcileArgs),

    /// Manage the background controller.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Context::from_env(cli.store)?;
    match cli.command {
        Commands::Watch { command } => commands::watch::run(&ctx, command),
        Commands::Scan(args) => args.run(),
        Commands::Diff(args) => args.run(&ctx),
        Commands::Reconcile(args) => args.run(&ctx),
        Commands::Daemon { command } => commands::daemon::run(&ctx, command),
    }
}
