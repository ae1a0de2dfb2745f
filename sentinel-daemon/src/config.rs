//! Controller configuration.
//!
//! Loaded from `~/.sentinel/config.yaml` when present; every field has a
//! default so an empty or missing file yields a working controller.
//! Command-line overrides are applied by the CLI after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sentinel_core::Namespace;
use sentinel_reconcile::{BackoffPolicy, WorkerSettings};

use crate::error::{io_err, DaemonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Record directory; `~/.sentinel/records` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_root: Option<PathBuf>,
    /// Only reconcile records in this namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub publish_scan_errors: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_root: None,
            namespace: None,
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            scan_timeout_ms: default_scan_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            max_conflict_retries: default_max_conflict_retries(),
            backoff: BackoffPolicy::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            publish_scan_errors: false,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    4
}

fn default_page_size() -> usize {
    100
}

fn default_scan_timeout_ms() -> u64 {
    60_000
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl ControllerConfig {
    /// Read `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(path, err)),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.concurrency == 0 {
            return Err(DaemonError::Config("concurrency must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(DaemonError::Config("poll_interval_ms must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(DaemonError::Config("page_size must be at least 1".into()));
        }
        for (field, value) in [
            ("scan_timeout_ms", self.scan_timeout_ms),
            ("store_timeout_ms", self.store_timeout_ms),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
        ] {
            if value == 0 {
                return Err(DaemonError::Config(format!("{field} must be positive")));
            }
        }
        if self.backoff.base > self.backoff.max {
            return Err(DaemonError::Config(format!(
                "backoff.base_ms ({}) exceeds backoff.max_ms ({})",
                self.backoff.base.as_millis(),
                self.backoff.max.as_millis()
            )));
        }
        if self.backoff.max_attempts == 0 {
            return Err(DaemonError::Config(
                "backoff.max_attempts must be at least 1".into(),
            ));
        }
        if matches!(&self.namespace, Some(ns) if ns.trim().is_empty()) {
            return Err(DaemonError::Config("namespace filter must not be empty".into()));
        }
        if let Some(ns) = self.namespace_filter() {
            ns.validate()
                .map_err(|err| DaemonError::Config(format!("namespace filter: {err}")))?;
        }
        Ok(())
    }

    pub fn store_root_or(&self, home: &Path) -> PathBuf {
        self.store_root
            .clone()
            .unwrap_or_else(|| crate::paths::records_root(home))
    }

    pub fn namespace_filter(&self) -> Option<Namespace> {
        self.namespace.as_deref().map(Namespace::from)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            max_conflict_retries: self.max_conflict_retries,
            backoff: self.backoff,
            publish_scan_errors: self.publish_scan_errors,
        }
    }
}
