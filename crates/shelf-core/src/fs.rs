//! Filesystem utilities for atomic operations.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Build a unique temp path in the same directory as `destination`.
///
/// Keeping the temp file beside the destination guarantees the later rename
/// stays on one filesystem.
pub fn sibling_temp_path(destination: &Path, tag: &str) -> io::Result<PathBuf> {
    let parent = destination.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory")
    })?;
    let filename = destination
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid filename"))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("System time error: {}", e)))?
        .as_nanos();
    Ok(parent.join(format!(".{}.{}-{}.tmp", filename, tag, nanos)))
}

/// Write `data` to a new file at `path` and fsync it.
///
/// Fails if `path` already exists.
pub fn write_new_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(err) = file.write_all(data).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

/// Atomically move `temp_path` over `destination`.
///
/// The destination is always either the old file or the new file, never
/// absent, so there is no remove-then-retry fallback. On failure the temp
/// file is cleaned up and the destination is left untouched.
///
/// # Errors
///
/// Returns an error if the rename fails (for example across devices).
pub fn replace_atomic(temp_path: &Path, destination: &Path) -> io::Result<()> {
    fs::rename(temp_path, destination).map_err(|err| {
        let _ = fs::remove_file(temp_path);
        io::Error::new(err.kind(), format!("Atomic rename failed: {}", err))
    })?;
    if let Some(parent) = destination.parent() {
        sync_dir(parent);
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
