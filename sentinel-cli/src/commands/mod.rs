pub mod daemon;
pub mod diff;
pub mod reconcile;
pub mod scan;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use clap::Args;

use sentinel_core::{DirectoryStore, RecordKey};
use sentinel_daemon::{paths, ControllerConfig};

/// Where this invocation finds its home directory and record store.
#[derive(Debug, Clone)]
pub struct Context {
    pub home: PathBuf,
    pub store_override: Option<PathBuf>,
}

impl Context {
    pub fn from_env(store_override: Option<PathBuf>) -> Result<Self> {
        let home = paths::home_dir().context("could not determine home directory")?;
        Ok(Self {
            home,
            store_override,
        })
    }

    /// Config file (explicit path or `~/.sentinel/config.yaml`) with the
    /// global `--store` applied on top.
    pub fn load_config(&self, explicit: Option<&Path>) -> Result<ControllerConfig> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths::config_path(&self.home));
        let mut config = ControllerConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        if let Some(root) = &self.store_override {
            config.store_root = Some(root.clone());
        }
        Ok(config)
    }

    pub fn store(&self) -> Result<DirectoryStore> {
        let config = self.load_config(None)?;
        Ok(DirectoryStore::new(config.store_root_or(&self.home)))
    }
}

/// Controller flags shared by `reconcile` and `daemon start`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Config file (defaults to ~/.sentinel/config.yaml).
    #[arg(long, env = "SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Milliseconds between cycle starts.
    #[arg(long, env = "SENTINEL_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Maximum concurrent reconciles.
    #[arg(long, env = "SENTINEL_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Only reconcile records in this namespace.
    #[arg(long, env = "SENTINEL_NAMESPACE")]
    pub namespace: Option<String>,
}

impl ConfigOverrides {
    pub fn resolve(&self, ctx: &Context) -> Result<ControllerConfig> {
        let mut config = ctx.load_config(self.config.as_deref())?;
        if let Some(ms) = self.interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(ns) = &self.namespace {
            config.namespace = Some(ns.clone());
        }
        config.validate().context("invalid controller configuration")?;
        Ok(config)
    }
}

pub fn parse_key(raw: &str) -> Result<RecordKey> {
    raw.parse::<RecordKey>()
        .with_context(|| format!("invalid record key '{raw}' (expected <namespace>/<name>)"))
}

/// Resolve a user-supplied path against the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    let joined = cwd.join(path);
    if joined.as_os_str().is_empty() {
        bail!("empty path");
    }
    Ok(joined)
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

pub fn format_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}
