#![allow(dead_code)]

pub mod board_http;
pub mod config_test_utils;

use lanboard::store::FileMeta;
use sha2::{Digest, Sha256};
use std::path::Path;
use tempfile::TempDir;

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Plant a published file directly on disk: data plus a matching sidecar,
/// stamped with the given creation/access time. Lets tests reopen a store
/// over pre-existing or artificially aged content.
pub async fn write_stored_file(dir: &Path, identity: &str, data: &[u8], stamp_ms: u64) {
    tokio::fs::write(dir.join(identity), data)
        .await
        .expect("write data file");

    let meta = FileMeta {
        identity: identity.to_string(),
        name: identity.to_string(),
        size: data.len() as u64,
        content_type: "application/octet-stream".to_string(),
        sha256: hex::encode(Sha256::digest(data)),
        created_ms: stamp_ms,
        last_access_ms: stamp_ms,
    };
    tokio::fs::write(
        dir.join(format!("{identity}.meta.json")),
        serde_json::to_vec(&meta).expect("serialize sidecar"),
    )
    .await
    .expect("write sidecar");
}
