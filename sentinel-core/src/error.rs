//! Error types for sentinel-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ResourceVersion;

/// All errors that can arise from record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record does not exist (never created, or deleted).
    #[error("record not found: {key}")]
    NotFound { key: String },

    /// The caller's resource version no longer matches the stored one.
    #[error("resource version conflict on {key}: expected {expected}, store has {current}")]
    Conflict {
        key: String,
        expected: ResourceVersion,
        current: ResourceVersion,
    },

    /// The store is temporarily unreachable.
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The identity or payload cannot be used as-is.
    #[error("malformed record {key}: {reason}")]
    Malformed { key: String, reason: String },

    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Coarse classification used by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    Conflict,
    Unavailable,
    Permanent,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::Conflict { .. } => StoreErrorKind::Conflict,
            StoreError::Unavailable(_) => StoreErrorKind::Unavailable,
            StoreError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => StoreErrorKind::NotFound,
                _ => StoreErrorKind::Unavailable,
            },
            StoreError::Malformed { .. }
            | StoreError::Yaml(_)
            | StoreError::Parse { .. } => StoreErrorKind::Permanent,
        }
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_classify_by_kind() {
        let missing = io_err(
            "/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(missing.kind(), StoreErrorKind::NotFound);

        let denied = io_err(
            "/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(denied.kind(), StoreErrorKind::Unavailable);
    }

    #[test]
    fn conflict_message_names_both_versions() {
        let err = StoreError::Conflict {
            key: "default/logs".to_string(),
            expected: ResourceVersion::from("3"),
            current: ResourceVersion::from("4"),
        };
        assert_eq!(err.kind(), StoreErrorKind::Conflict);
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("store has 4"));
    }
}
