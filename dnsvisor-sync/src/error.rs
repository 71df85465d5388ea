//! Error types for dnsvisor-sync.

use std::path::PathBuf;

use thiserror::Error;

use dnsvisor_core::CoreError;
use dnsvisor_process::ProcessError;
use dnsvisor_renderer::RenderError;

/// All errors that can arise while applying configuration to an instance.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A declared tree that was refused before anything was applied.
    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The instance's process refused or failed the requested action.
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration cache (de)serialization.
    #[error("config cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
