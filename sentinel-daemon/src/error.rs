use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the controller loop, its configuration, and the control
/// socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store error: {0}")]
    Store(#[from] sentinel_core::StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },

    #[error("control socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },

    #[error("control protocol error: {0}")]
    Protocol(String),

    #[error("controller is not running (no control socket at {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("home directory not found")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
