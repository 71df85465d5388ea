//! Error types for dnsvisor-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading settings or checking a
/// declared configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file that failed.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Settings parsed but describe something unusable.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A declared configuration tree that cannot be applied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
