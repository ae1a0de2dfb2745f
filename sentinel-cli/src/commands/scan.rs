//! `sentinel scan <path>`: one snapshot, printed.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use sentinel_core::FileEntry;
use sentinel_reconcile::scan;

use super::{absolute, format_time};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// File or directory to scan.
    pub path: PathBuf,

    #[arg(long)]
    pub recursive: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ScanJson<'a> {
    root: &'a std::path::Path,
    soft_errors: usize,
    entries: &'a [FileEntry],
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "type")]
    kind: &'static str,
    #[tabled(rename = "size")]
    size: u64,
    #[tabled(rename = "modified")]
    modified: String,
    #[tabled(rename = "inode")]
    inode: u64,
}

impl ScanArgs {
    pub fn run(self) -> Result<()> {
        let root = absolute(&self.path)?;
        let snapshot = scan(&root, self.recursive)
            .with_context(|| format!("scan failed for {}", root.display()))?;

        if self.json {
            let payload = ScanJson {
                root: &snapshot.root,
                soft_errors: snapshot.soft_errors,
                entries: &snapshot.entries,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize scan JSON")?
            );
            return Ok(());
        }

        println!(
            "{} | {} entries | {} skipped",
            snapshot.root.display(),
            snapshot.entries.len(),
            snapshot.soft_errors
        );
        if snapshot.entries.is_empty() {
            return Ok(());
        }

        let rows: Vec<EntryRow> = snapshot
            .entries
            .iter()
            .map(|e| EntryRow {
                path: e
                    .path
                    .strip_prefix(&snapshot.root)
                    .ok()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(&e.path)
                    .display()
                    .to_string(),
                kind: if e.is_dir { "dir" } else { "file" },
                size: e.size,
                modified: format_time(Some(e.mod_time)),
                inode: e.inode,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
