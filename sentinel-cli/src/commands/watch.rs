//! `sentinel watch`: create, inspect, and remove watch records.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use sentinel_core::{enumerate, ApplyResult, Namespace, StoreError, WatchRecord, WatchSpec};

use super::{absolute, format_time, parse_key, Context};

#[derive(Subcommand, Debug)]
pub enum WatchCommand {
    /// Declare a path to watch (updates the spec if the record exists).
    Add(AddArgs),
    /// List watch records.
    List(ListArgs),
    /// Print one record as YAML.
    Show {
        /// Record key, `<namespace>/<name>`.
        key: String,
    },
    /// Delete a watch record.
    Remove {
        /// Record key, `<namespace>/<name>`.
        key: String,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Record key, `<namespace>/<name>`.
    pub key: String,

    /// Path to observe.
    #[arg(long)]
    pub path: PathBuf,

    /// Include all descendants, not only direct children.
    #[arg(long)]
    pub recursive: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub namespace: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(ctx: &Context, command: WatchCommand) -> Result<()> {
    match command {
        WatchCommand::Add(args) => add(ctx, args),
        WatchCommand::List(args) => list(ctx, args),
        WatchCommand::Show { key } => show(ctx, &key),
        WatchCommand::Remove { key } => remove(ctx, &key),
    }
}

fn add(ctx: &Context, args: AddArgs) -> Result<()> {
    let key = parse_key(&args.key)?;
    let spec = WatchSpec {
        path: absolute(&args.path)?,
        recursive: args.recursive,
    };
    let store = ctx.store()?;
    let result = store
        .apply(&key, spec)
        .with_context(|| format!("failed to save watch record '{key}'"))?;

    let verb = match &result {
        ApplyResult::Created(_) => "created".green(),
        ApplyResult::Updated(_) => "updated".yellow(),
        ApplyResult::Unchanged(_) => "unchanged".normal(),
    };
    println!(
        "{key} {verb} ({})",
        result.record().spec.path.display()
    );
    Ok(())
}

#[derive(Serialize)]
struct RecordJson<'a> {
    key: String,
    path: &'a std::path::Path,
    recursive: bool,
    files: usize,
    resource_version: &'a str,
    last_reconciled: Option<String>,
    last_error: Option<&'a str>,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "record")]
    key: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "recursive")]
    recursive: bool,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "last reconciled")]
    last_reconciled: String,
    #[tabled(rename = "error")]
    error: String,
}

fn list(ctx: &Context, args: ListArgs) -> Result<()> {
    let store = ctx.store()?;
    let namespace = args.namespace.map(Namespace::from);
    let records = enumerate(&store, namespace.as_ref(), sentinel_core::registry::DEFAULT_PAGE_SIZE)
        .context("failed to list watch records")?;

    if args.json {
        let payload: Vec<RecordJson<'_>> = records.iter().map(record_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize records JSON")?
        );
        return Ok(());
    }

    if records.is_empty() {
        println!("No watch records.");
        return Ok(());
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            key: r.key().to_string(),
            path: r.spec.path.display().to_string(),
            recursive: r.spec.recursive,
            files: r.status.files.len(),
            last_reconciled: format_time(r.status.last_reconciled),
            error: r.status.last_error.clone().unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn record_json(record: &WatchRecord) -> RecordJson<'_> {
    RecordJson {
        key: record.key().to_string(),
        path: &record.spec.path,
        recursive: record.spec.recursive,
        files: record.status.files.len(),
        resource_version: &record.metadata.resource_version.0,
        last_reconciled: record.status.last_reconciled.map(|t| t.to_rfc3339()),
        last_error: record.status.last_error.as_deref(),
    }
}

fn show(ctx: &Context, raw: &str) -> Result<()> {
    let key = parse_key(raw)?;
    let record = ctx
        .store()?
        .get(&key)
        .with_context(|| format!("failed to load watch record '{key}'"))?;
    print!(
        "{}",
        serde_yaml::to_string(&record).context("failed to render record YAML")?
    );
    Ok(())
}

fn remove(ctx: &Context, raw: &str) -> Result<()> {
    let key = parse_key(raw)?;
    match ctx.store()?.delete(&key) {
        Ok(()) => println!("{key} {}", "removed".red()),
        Err(StoreError::NotFound { .. }) => println!("{key} not found"),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to remove watch record '{key}'"))
        }
    }
    Ok(())
}
