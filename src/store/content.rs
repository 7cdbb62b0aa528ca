//! Concurrent on-disk store for uploaded files.
//!
//! Writes stream into a temp file guarded by RAII cleanup, then publish in
//! one direction: sidecar write, rename, registry insert. Readers only ever
//! see fully published files.

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::common::errors::AppError;
use crate::common::fsio::{is_temp_artifact, temp_path_for};
use crate::store::meta::{data_path, meta_path, new_identity, unix_ms, FileMeta, META_SUFFIX};

/// Allowance for multipart framing and form fields on top of the payload
/// limit, shared by the router body cap and the upload precheck.
pub const UPLOAD_OVERHEAD_BYTES: u64 = 64 * 1024;

const DISK_SPACE_BUFFER_BYTES: u64 = 1024 * 1024 * 1024;

/// The one size gate every upload path goes through, whatever transport the
/// bytes arrived on.
pub fn check_size_limit(bytes: u64, limit_bytes: u64) -> Result<(), AppError> {
    if bytes > limit_bytes {
        return Err(AppError::PayloadTooLarge { limit_bytes });
    }
    Ok(())
}

/// Client-declared attributes of an incoming upload.
pub struct NewUpload<'a> {
    pub name: &'a str,
    /// Known ahead of time on the realtime path; multipart uploads stream
    /// with no declared size.
    pub declared_size: Option<u64>,
    pub content_type: &'a str,
}

/// Open descriptor plus metadata for one download.
pub struct FileHandle {
    pub file: File,
    pub meta: FileMeta,
}

/// Streams one upload into a temp file next to its final location.
///
/// RAII: `disarmed=false` → Drop deletes the temp. Set `true` after the
/// rename into place succeeds.
struct DraftFile {
    file: File,
    path: PathBuf,
    written: u64,
    hasher: Sha256,
    disarmed: bool,
}

impl DraftFile {
    async fn create(dir: &Path, identity: &str) -> Result<Self> {
        let path = temp_path_for(&data_path(dir, identity));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .context(format!("Failed to create draft file: {}", path.display()))?;

        Ok(Self {
            file,
            path,
            written: 0,
            hasher: Sha256::new(),
            disarmed: false,
        })
    }

    fn written(&self) -> u64 {
        self.written
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .context("Failed to write upload chunk")?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and fsync the draft, returning the hex SHA-256 of everything
    /// written. The draft stays armed until [`DraftFile::promote`] succeeds.
    async fn seal(&mut self) -> Result<String> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        let hasher = std::mem::take(&mut self.hasher);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Rename the draft to its final location and disarm drop cleanup.
    async fn promote(mut self, dest: &Path) -> Result<()> {
        tokio::fs::rename(&self.path, dest)
            .await
            .context(format!("Failed to publish upload to {}", dest.display()))?;
        self.disarmed = true;
        Ok(())
    }
}

/// RAII cleanup: deletes the temp file unless the draft was promoted.
impl Drop for DraftFile {
    fn drop(&mut self) {
        if !self.disarmed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to clean up draft file"
                    );
                }
            }
        }
    }
}

/// On-disk set of uploaded files with an in-memory registry.
///
/// The registry is the publication point: a file is visible exactly when its
/// metadata is present here. Per-identity mutexes serialize read-refresh
/// against delete; puts work on unpublished names and need no lock.
pub struct ContentStore {
    dir: PathBuf,
    registry: DashMap<String, FileMeta>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContentStore {
    /// Open the store, creating the directory and rebuilding the registry
    /// from sidecars. Crash leftovers (orphaned data, orphaned sidecars,
    /// stale temps) are swept out before the store goes live.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .context(format!("Failed to create uploads dir: {}", dir.display()))?;

        let store = Self {
            dir,
            registry: DashMap::new(),
            locks: DashMap::new(),
        };
        store.scan().await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accept one upload stream and publish it under a fresh identity.
    ///
    /// The running total is checked against the limit after every chunk, so a
    /// lying or unbounded stream is cut off without being consumed further. A
    /// declared size must match the bytes actually received.
    pub async fn put<S>(
        &self,
        upload: NewUpload<'_>,
        limit_bytes: u64,
        mut stream: S,
    ) -> Result<FileMeta, AppError>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        if let Some(declared) = upload.declared_size {
            check_size_limit(declared, limit_bytes)?;
        }
        check_disk_space(&self.dir, upload.declared_size.unwrap_or(limit_bytes))
            .map_err(|e| AppError::InsufficientStorage(e.to_string()))?;

        let identity = new_identity(upload.name);
        let mut draft = DraftFile::create(&self.dir, &identity)
            .await
            .map_err(AppError::Storage)?;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("upload stream failed: {e:#}")))?;
            check_size_limit(draft.written() + chunk.len() as u64, limit_bytes)?;
            draft.write_chunk(&chunk).await.map_err(AppError::Storage)?;
            tracing::debug!(bytes = chunk.len(), total = draft.written(), "chunk_write");
        }

        if let Some(declared) = upload.declared_size {
            if draft.written() != declared {
                return Err(AppError::BadRequest(format!(
                    "size mismatch: got {} bytes, declared {}",
                    draft.written(),
                    declared
                )));
            }
        }

        let sha256 = draft.seal().await.map_err(AppError::Storage)?;
        let now = unix_ms();
        let meta = FileMeta {
            identity: identity.clone(),
            name: upload.name.to_string(),
            size: draft.written(),
            content_type: upload.content_type.to_string(),
            sha256,
            created_ms: now,
            last_access_ms: now,
        };

        let sidecar = meta_path(&self.dir, &identity);
        write_sidecar(&sidecar, &meta).await.map_err(AppError::Storage)?;
        if let Err(e) = draft.promote(&data_path(&self.dir, &identity)).await {
            let _ = tokio::fs::remove_file(&sidecar).await;
            return Err(AppError::Storage(e));
        }
        self.registry.insert(identity.clone(), meta.clone());

        tracing::info!(
            identity = %meta.identity,
            name = %meta.name,
            size = meta.size,
            "file stored"
        );
        Ok(meta)
    }

    /// Open a stored file for download and refresh its last-access stamp.
    ///
    /// The per-identity lock covers only the open and refresh; body streaming
    /// happens on the returned descriptor after the lock is gone, so a
    /// concurrent delete can proceed while a slow client drains old bytes.
    pub async fn get(&self, identity: &str) -> Result<FileHandle, AppError> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let mut meta = self
            .registry
            .get(identity)
            .map(|e| e.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("no such file: {identity}")))?;

        let path = data_path(&self.dir, identity);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Registry says yes but the bytes are gone: external tamper.
                tracing::warn!(identity, "registered file missing on disk, dropping entry");
                self.registry.remove(identity);
                return Err(AppError::NotFound(format!("no such file: {identity}")));
            }
            Err(e) => {
                return Err(AppError::Storage(
                    anyhow::Error::new(e).context("Failed to open stored file"),
                ))
            }
        };

        meta.last_access_ms = unix_ms();
        write_sidecar(&meta_path(&self.dir, identity), &meta)
            .await
            .map_err(AppError::Storage)?;
        self.registry.insert(identity.to_string(), meta.clone());

        Ok(FileHandle { file, meta })
    }

    /// Remove a file and its sidecar. Idempotent: deleting an unknown or
    /// already-deleted identity succeeds.
    pub async fn delete(&self, identity: &str) -> Result<(), AppError> {
        let lock = self.lock_for(identity);
        let guard = lock.lock().await;

        self.registry.remove(identity);
        remove_quiet(&data_path(&self.dir, identity)).await?;
        remove_quiet(&meta_path(&self.dir, identity)).await?;

        drop(guard);
        self.locks.remove(identity);
        tracing::debug!(identity, "file deleted");
        Ok(())
    }

    /// Point-in-time metadata snapshot, oldest first.
    pub fn list(&self) -> Vec<FileMeta> {
        let mut items: Vec<FileMeta> = self.registry.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| {
            a.created_ms
                .cmp(&b.created_ms)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        items
    }

    pub fn meta(&self, identity: &str) -> Option<FileMeta> {
        self.registry.get(identity).map(|e| e.value().clone())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.registry.contains_key(identity)
    }

    pub fn file_count(&self) -> usize {
        self.registry.len()
    }

    /// Delete every stored file. Used when the board is cleared.
    pub async fn purge(&self) -> Result<(), AppError> {
        for meta in self.list() {
            self.delete(&meta.identity).await?;
        }
        Ok(())
    }

    /// Remove temp files older than `grace`. Fresh temps may belong to an
    /// in-flight upload and are left alone.
    pub async fn remove_stale_temps(&self, grace: std::time::Duration) -> Result<usize> {
        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .context("Failed to scan uploads dir for temps")?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_temp_artifact(&name) {
                continue;
            }

            let age = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified.elapsed().unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "cannot stat temp file");
                    continue;
                }
            };
            if age < grace {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(file = %name, "removed stale temp file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove temp file"),
            }
        }

        Ok(removed)
    }

    fn lock_for(&self, identity: &str) -> Arc<Mutex<()>> {
        self.locks.entry(identity.to_string()).or_default().clone()
    }

    /// Rebuild the registry from disk. Pairs with a readable sidecar are
    /// registered; a data file whose sidecar is unreadable gets the sidecar
    /// rebuilt from filesystem metadata; everything unpaired is removed.
    async fn scan(&self) -> Result<()> {
        let mut data_files: HashMap<String, PathBuf> = HashMap::new();
        let mut sidecars: HashMap<String, PathBuf> = HashMap::new();
        let mut temps: Vec<PathBuf> = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .context("Failed to read uploads dir")?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_artifact(&name) {
                temps.push(entry.path());
            } else if let Some(identity) = name.strip_suffix(META_SUFFIX) {
                sidecars.insert(identity.to_string(), entry.path());
            } else {
                data_files.insert(name, entry.path());
            }
        }

        let mut removed = 0usize;

        // No writer can be alive at startup, so every temp is an abandoned draft.
        for path in temps {
            let _ = tokio::fs::remove_file(&path).await;
            removed += 1;
        }

        for (identity, data) in &data_files {
            let Some(sidecar) = sidecars.remove(identity) else {
                tracing::warn!(identity, "data file without sidecar, removing");
                let _ = tokio::fs::remove_file(data).await;
                removed += 1;
                continue;
            };

            let meta = match read_sidecar(&sidecar).await {
                Ok(meta) if meta.identity == *identity => meta,
                Ok(_) => {
                    tracing::warn!(identity, "sidecar names a different identity, rebuilding");
                    self.rebuild_sidecar(identity, data, &sidecar).await?
                }
                Err(e) => {
                    tracing::warn!(identity, error = format!("{e:#}"), "unreadable sidecar, rebuilding");
                    self.rebuild_sidecar(identity, data, &sidecar).await?
                }
            };
            self.registry.insert(identity.clone(), meta);
        }

        // Whatever sidecars remain have no data file behind them.
        for (identity, sidecar) in sidecars {
            tracing::warn!(identity = %identity, "sidecar without data file, removing");
            let _ = tokio::fs::remove_file(&sidecar).await;
            removed += 1;
        }

        tracing::info!(
            files = self.registry.len(),
            cleaned = removed,
            dir = %self.dir.display(),
            "content store ready"
        );
        Ok(())
    }

    async fn rebuild_sidecar(
        &self,
        identity: &str,
        data: &Path,
        sidecar: &Path,
    ) -> Result<FileMeta> {
        let fs_meta = tokio::fs::metadata(data)
            .await
            .context("Failed to stat data file while rebuilding sidecar")?;
        let stamp_ms = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(unix_ms);

        let meta = FileMeta {
            identity: identity.to_string(),
            name: identity.to_string(),
            size: fs_meta.len(),
            content_type: "application/octet-stream".to_string(),
            sha256: hash_file(data).await?,
            created_ms: stamp_ms,
            last_access_ms: stamp_ms,
        };
        write_sidecar(sidecar, &meta).await?;
        Ok(meta)
    }
}

async fn read_sidecar(path: &Path) -> Result<FileMeta> {
    let raw = tokio::fs::read(path)
        .await
        .context(format!("Failed to read sidecar {}", path.display()))?;
    serde_json::from_slice(&raw).context(format!("Failed to parse sidecar {}", path.display()))
}

async fn write_sidecar(path: &Path, meta: &FileMeta) -> Result<()> {
    let body = serde_json::to_vec_pretty(meta).context("Failed to serialize file metadata")?;

    let tmp = temp_path_for(path);
    tokio::fs::write(&tmp, &body)
        .await
        .context(format!("Failed to write sidecar temp {}", tmp.display()))?;
    let file = OpenOptions::new().write(true).open(&tmp).await?;
    file.sync_all().await?;
    tokio::fs::rename(&tmp, path)
        .await
        .context(format!("Failed to replace sidecar {}", path.display()))?;
    Ok(())
}

async fn hash_file(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = File::open(path)
        .await
        .context(format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024]; // 64KB

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

async fn remove_quiet(path: &Path) -> Result<(), AppError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Storage(
            anyhow::Error::new(e).context(format!("Failed to remove {}", path.display())),
        )),
    }
}

/// Ensure the uploads filesystem has room for `bytes` plus a safety buffer.
/// When no mount point matches, the check is skipped rather than failed: an
/// unknowable answer is not a full disk.
fn check_disk_space(destination: &Path, bytes: u64) -> Result<()> {
    use sysinfo::Disks;

    let disks = Disks::new_with_refreshed_list();

    // Convert relative paths to absolute before matching against mount points
    let abs_destination =
        std::fs::canonicalize(destination).unwrap_or_else(|_| destination.to_path_buf());
    let dest_str = abs_destination.to_string_lossy();

    let mut available: Option<u64> = None;
    let mut longest_match_len = 0;
    let required_bytes = bytes + DISK_SPACE_BUFFER_BYTES;

    // Find disk with longest matching mount point (most specific)
    for disk in disks.list() {
        let mount_point = disk.mount_point().to_string_lossy();
        let mount_len = mount_point.len();
        if dest_str.starts_with(mount_point.as_ref()) && mount_len > longest_match_len {
            available = Some(disk.available_space());
            longest_match_len = mount_len;
        }
    }

    match available {
        Some(avail) if avail >= required_bytes => Ok(()),
        Some(avail) => Err(anyhow::anyhow!(
            "Insufficient disk space: {} MB available, {} MB required",
            avail / (1024 * 1024),
            required_bytes / (1024 * 1024)
        )),
        None => {
            tracing::warn!(
                destination = %destination.display(),
                "cannot determine available disk space, accepting upload anyway"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn size_limit_allows_at_most_the_limit() {
        assert!(check_size_limit(0, 100).is_ok());
        assert!(check_size_limit(100, 100).is_ok());
        let err = check_size_limit(101, 100).expect_err("over limit");
        assert!(matches!(err, AppError::PayloadTooLarge { limit_bytes: 100 }));
    }

    #[tokio::test]
    async fn dropped_draft_removes_temp() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut draft = DraftFile::create(dir.path(), "abc123.bin").await.unwrap();
            draft.write_chunk(b"partial upload").await.unwrap();
            path = draft.path.clone();
            assert!(path.exists());
        }
        assert!(!path.exists(), "temp should be gone after drop");
    }

    #[tokio::test]
    async fn promoted_draft_keeps_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("abc123.bin");

        let mut draft = DraftFile::create(dir.path(), "abc123.bin").await.unwrap();
        draft.write_chunk(b"whole upload").await.unwrap();
        let temp = draft.path.clone();
        let digest = draft.seal().await.unwrap();
        draft.promote(&dest).await.unwrap();

        assert!(dest.exists());
        assert!(!temp.exists());
        assert_eq!(digest, hex::encode(Sha256::digest(b"whole upload")));
    }
}
