use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "sentinel.sock";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn sentinel_root(home: &Path) -> PathBuf {
    home.join(".sentinel")
}

pub fn records_root(home: &Path) -> PathBuf {
    sentinel_core::registry::default_root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    sentinel_root(home).join(DAEMON_SOCKET)
}

pub fn config_path(home: &Path) -> PathBuf {
    sentinel_root(home).join(CONFIG_FILE)
}

pub fn home_dir() -> Result<PathBuf, crate::DaemonError> {
    dirs::home_dir().ok_or(crate::DaemonError::HomeNotFound)
}
