//! Metadata model and identity naming for stored files.
//!
//! A stored file is two directory entries: `<identity>` holding the bytes and
//! `<identity>.meta.json` holding the record below. The identity is generated
//! server-side and doubles as the download capability, so the client-supplied
//! filename never touches the filesystem.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const META_SUFFIX: &str = ".meta.json";

const MAX_EXT_LEN: usize = 10;
const IMAGE_EXTS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Coarse classification used by the board UI to decide between an inline
/// preview and a plain download link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    File,
}

/// Sidecar record for one stored file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub identity: String,
    /// Original client-supplied filename, kept for display and the download
    /// Content-Disposition header only.
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub sha256: String,
    pub created_ms: u64,
    pub last_access_ms: u64,
}

impl FileMeta {
    pub fn kind(&self) -> FileKind {
        match safe_extension(&self.identity) {
            Some(ext) if IMAGE_EXTS.contains(&ext.as_str()) => FileKind::Image,
            _ => FileKind::File,
        }
    }
}

/// Current wall-clock time as unix milliseconds.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Extract a lowercase extension of 1 to 10 alphanumeric characters, or
/// nothing. Anything else is dropped rather than sanitized.
pub fn safe_extension(name: &str) -> Option<String> {
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    if ext.is_empty() || ext.len() > MAX_EXT_LEN {
        return None;
    }
    let ext = ext.to_ascii_lowercase();
    ext.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .then_some(ext)
}

/// Generate a fresh identity: 32 hex chars plus the safe extension, if any.
pub fn new_identity(original_name: &str) -> String {
    let stem = Uuid::new_v4().simple().to_string();
    match safe_extension(original_name) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

pub fn data_path(dir: &Path, identity: &str) -> PathBuf {
    dir.join(identity)
}

pub fn meta_path(dir: &Path, identity: &str) -> PathBuf {
    dir.join(format!("{identity}{META_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_extension_accepts_plain_suffixes() {
        assert_eq!(safe_extension("photo.PNG"), Some("png".to_string()));
        assert_eq!(safe_extension("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(safe_extension("doc.v2"), Some("v2".to_string()));
    }

    #[test]
    fn safe_extension_rejects_odd_suffixes() {
        assert_eq!(safe_extension("no_extension"), None);
        assert_eq!(safe_extension("trailing.dot."), None);
        assert_eq!(safe_extension("too.longextension1"), None);
        assert_eq!(safe_extension("bad.ex-t"), None);
        assert_eq!(safe_extension("unicode.pngé"), None);
    }

    #[test]
    fn identity_keeps_extension_and_stays_opaque() {
        let id = new_identity("vacation photo.JPG");
        assert!(id.ends_with(".jpg"));
        assert_eq!(id.len(), 32 + ".jpg".len());
        assert!(!id.contains(' '));

        let bare = new_identity("README");
        assert_eq!(bare.len(), 32);
    }

    #[test]
    fn identities_are_unique() {
        assert_ne!(new_identity("a.txt"), new_identity("a.txt"));
    }

    #[test]
    fn kind_follows_identity_extension() {
        let mut meta = FileMeta {
            identity: "abc.png".to_string(),
            name: "x".to_string(),
            size: 1,
            content_type: "image/png".to_string(),
            sha256: String::new(),
            created_ms: 0,
            last_access_ms: 0,
        };
        assert_eq!(meta.kind(), FileKind::Image);

        meta.identity = "abc.pdf".to_string();
        assert_eq!(meta.kind(), FileKind::File);

        meta.identity = "abc".to_string();
        assert_eq!(meta.kind(), FileKind::File);
    }

    #[test]
    fn paths_pair_data_and_sidecar() {
        let dir = Path::new("/data/uploads");
        assert_eq!(
            data_path(dir, "abc.png"),
            PathBuf::from("/data/uploads/abc.png")
        );
        assert_eq!(
            meta_path(dir, "abc.png"),
            PathBuf::from("/data/uploads/abc.png.meta.json")
        );
    }
}
