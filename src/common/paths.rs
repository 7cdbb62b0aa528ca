//! Filesystem layout resolution.
//!
//! Everything the service persists lives under one base directory:
//! `config.json`, `uploads/`, and `history.jsonl`. The base is picked once at
//! startup and never derived from the executable's location, so installs and
//! upgrades cannot scatter state.

use crate::common::errors::SetupError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "LANBOARD_HOME";

const CONFIG_FILE: &str = "config.json";
const UPLOADS_DIR: &str = "uploads";
const HISTORY_FILE: &str = "history.jsonl";

/// Resolved locations for all persisted state.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base: PathBuf,
}

impl AppPaths {
    /// Resolve the base directory. Precedence: explicit flag, `LANBOARD_HOME`,
    /// then the platform default (`./.lanboard` in dev builds, per-user data
    /// directory in release builds).
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let base = explicit
            .or_else(|| std::env::var_os(HOME_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_base);
        Self { base }
    }

    fn default_base() -> PathBuf {
        if cfg!(debug_assertions) {
            return PathBuf::from(".lanboard");
        }
        ProjectDirs::from("", "", "lanboard")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".lanboard"))
    }

    /// Create the directory tree and probe it for writability. Failures here
    /// are fatal: a board that cannot persist uploads has nothing to serve.
    pub fn ensure_ready(&self) -> Result<(), SetupError> {
        for dir in [self.base.clone(), self.uploads_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| SetupError::DataDir {
                path: dir.clone(),
                source,
            })?;
        }

        let probe = self.base.join(".write_check");
        std::fs::write(&probe, b"ok").map_err(|source| SetupError::NotWritable {
            path: self.base.clone(),
            source,
        })?;
        let _ = std::fs::remove_file(&probe);

        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn config_path(&self) -> PathBuf {
        self.base.join(CONFIG_FILE)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.base.join(UPLOADS_DIR)
    }

    pub fn history_path(&self) -> PathBuf {
        self.base.join(HISTORY_FILE)
    }
}
