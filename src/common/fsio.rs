//! File I/O helpers for safe document writes.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Atomically replace a file with new contents. The temp file lands next to
/// the target so the final rename never crosses a filesystem boundary.
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write temporary file {}", tmp_path.display()))?;

    let file = fs::OpenOptions::new()
        .write(true)
        .open(&tmp_path)
        .with_context(|| format!("Failed to reopen temporary file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temporary file {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to replace {} from {}",
            path.display(),
            tmp_path.display()
        )
    })?;

    Ok(())
}

/// Build a unique temp path next to the target file.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let base_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("file");
    let tmp_name = format!(".{base_name}.{}.tmp", Uuid::new_v4());
    path.with_file_name(tmp_name)
}

/// Whether a file name matches the temp naming scheme used by
/// [`temp_path_for`]. Startup scans and the sweeper use this to spot
/// leftovers from interrupted writes.
pub fn is_temp_artifact(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}
