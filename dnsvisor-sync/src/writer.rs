//! Hash-gated atomic writer for generated files.
//!
//! ## `atomic_write`
//!
//! 1. Normalise line endings and SHA-256 hash the rendered content.
//! 2. Compare with the instance's hash store → skip if identical and the
//!    file is still on disk.
//! 3. Write to `<path>.dnsvisor.tmp` (with the requested mode).
//! 4. Rename to the final path (atomic on POSIX).
//! 5. Record the new hash.
//!
//! The hash store lives in memory for the lifetime of an instance; a daemon
//! restart rewrites every file once.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

/// Maps generated file paths to the SHA-256 hex digest last written there.
pub type HashStore = HashMap<String, String>;

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// Rendered content matches what was last written.
    Unchanged { path: PathBuf },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Mode for generated files that carry credentials.
pub const PRIVATE_MODE: u32 = 0o600;

/// Atomically write a single rendered file and update the hash store.
pub fn atomic_write(
    path: &Path,
    content: &str,
    store: &mut HashStore,
) -> Result<WriteResult, SyncError> {
    atomic_write_mode(path, content, store, None)
}

/// [`atomic_write`] with an explicit permission mode on the new file.
pub fn atomic_write_mode(
    path: &Path,
    content: &str,
    store: &mut HashStore,
    mode: Option<u32>,
) -> Result<WriteResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.dnsvisor.tmp", path.display()));
    atomic_write_with_tmp(path, content, store, mode, &tmp)
}

fn atomic_write_with_tmp(
    path: &Path,
    content: &str,
    store: &mut HashStore,
    mode: Option<u32>,
    tmp: &Path,
) -> Result<WriteResult, SyncError> {
    let normalized = content.replace("\r\n", "\n");
    let content = normalized.as_str();

    let digest = hex::encode(Sha256::digest(content.as_bytes()));

    let key = path.to_string_lossy().to_string();
    if store.get(&key) == Some(&digest) && path.exists() {
        tracing::debug!(path = %path.display(), "unchanged");
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;
    if let Some(mode) = mode {
        set_mode(tmp, mode)?;
    }

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    store.insert(key, digest);
    tracing::info!(path = %path.display(), "wrote");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

/// Best-effort removal of a generated file. Failures are logged at debug.
///
/// Returns `true` when a file was actually removed.
pub fn remove_file_logged(path: &Path, store: &mut HashStore) -> bool {
    store.remove(path.to_string_lossy().as_ref());
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "removed");
            true
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "remove skipped");
            false
        }
    }
}

/// Remove `dir` if it exists and is empty; anything else is logged at debug.
pub fn remove_dir_if_empty(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        if e.kind() != ErrorKind::NotFound {
            tracing::debug!(path = %dir.display(), error = %e, "directory kept");
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SyncError> {
    Ok(())
}
