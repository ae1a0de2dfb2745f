//! `sentinel diff <ns/name>`: what the next reconcile would write.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use sentinel_core::RecordStore;
use sentinel_reconcile::{RecordWorker, WriteBackCoordinator};

use super::{parse_key, runtime, Context};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Record key, `<namespace>/<name>`.
    pub key: String,
}

impl DiffArgs {
    pub fn run(self, ctx: &Context) -> Result<()> {
        let key = parse_key(&self.key)?;
        let config = ctx.load_config(None)?;
        let store = ctx.store()?;
        let record = store
            .get(&key)
            .with_context(|| format!("failed to load watch record '{key}'"))?;

        let store: Arc<dyn RecordStore> = Arc::new(store);
        let worker = RecordWorker::new(
            WriteBackCoordinator::new(store, config.store_timeout()),
            config.worker_settings(),
        );
        let plan = runtime()?
            .block_on(worker.plan(&record))
            .with_context(|| format!("scan failed for '{key}'"))?;

        if plan.changes.is_empty() {
            println!("No differences for '{key}'.");
            return Ok(());
        }

        for entry in &plan.changes.added {
            println!("{} {}", "+".green(), entry.path.display());
        }
        for update in &plan.changes.updated {
            println!(
                "{} {} (size {} -> {}, modified {} -> {})",
                "~".yellow(),
                update.new.path.display(),
                update.old.size,
                update.new.size,
                update.old.mod_time.to_rfc3339(),
                update.new.mod_time.to_rfc3339(),
            );
        }
        for path in &plan.changes.removed {
            println!("{} {}", "-".red(), path.display());
        }

        let summary = plan.changes.summary();
        println!(
            "{} added, {} updated, {} removed",
            summary.added, summary.updated, summary.removed
        );
        Ok(())
    }
}
