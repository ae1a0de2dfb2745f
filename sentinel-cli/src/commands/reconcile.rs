//! `sentinel reconcile`: run the controller in the foreground.

use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use sentinel_core::{DirectoryStore, RecordStore};
use sentinel_daemon::{init_tracing, run, LogFormat, Scheduler};
use sentinel_reconcile::{Outcome, ReconcileReport};

use super::{runtime, ConfigOverrides, Context};

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Run a single cycle, wait for it, and exit.
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "record")]
    key: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "added")]
    added: usize,
    #[tabled(rename = "updated")]
    updated: usize,
    #[tabled(rename = "removed")]
    removed: usize,
    #[tabled(rename = "writes")]
    writes: u32,
}

impl ReconcileArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let config = self.overrides.resolve(ctx)?;
        init_tracing(LogFormat::Text);

        if !self.once {
            return runtime()?
                .block_on(run(ctx.home.clone(), config))
                .context("controller exited with error");
        }

        let store: Arc<dyn RecordStore> =
            Arc::new(DirectoryStore::new(config.store_root_or(&ctx.home)));
        let mut scheduler = Scheduler::new(store, &config);
        let (cycle, mut reports) = runtime()?
            .block_on(scheduler.run_once())
            .context("reconcile cycle failed")?;
        reports.sort_by(|a, b| a.key.cmp(&b.key));

        println!(
            "{} records | {} reconciled",
            cycle.enumerated, cycle.dispatched
        );
        if reports.is_empty() {
            return Ok(());
        }
        print_reports(&reports);

        let failed = reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
            .count();
        if failed > 0 {
            println!("{}", format!("{failed} record(s) failed").red());
            bail!("{failed} of {} record(s) failed", reports.len());
        }
        Ok(())
    }
}

fn print_reports(reports: &[ReconcileReport]) {
    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            key: r.key.to_string(),
            outcome: r.outcome.label(),
            added: r.changes.added,
            updated: r.changes.updated,
            removed: r.changes.removed,
            writes: r.write_attempts,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
