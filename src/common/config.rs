//! Settings schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI

use crate::common::errors::SetupError;
use crate::common::fsio::atomic_write;
use anyhow::{ensure, Result};
use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

const ENV_PREFIX: &str = "LANBOARD_";

/// Hard ceiling on the configurable upload limit.
pub const MAX_UPLOAD_CEILING_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Address exposure policy for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BindScope {
    Loopback,
    #[default]
    All,
}

/// Fully resolved service configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub bind: BindScope,
    /// Shared secret gating every mutating endpoint. Generated on first run;
    /// never defaulted to a fixed value.
    pub access_key: String,
    pub max_upload_bytes: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8787,
            bind: BindScope::All,
            access_key: String::new(),
            max_upload_bytes: 30 * 1024 * 1024,
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            history_limit: 800,
        }
    }
}

impl Settings {
    /// Validates merged settings and rejects unsafe values.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_upload_bytes > 0,
            "Invalid config: max_upload_bytes must be > 0"
        );
        ensure!(
            self.max_upload_bytes <= MAX_UPLOAD_CEILING_BYTES,
            "Invalid config: max_upload_bytes must be <= {MAX_UPLOAD_CEILING_BYTES}"
        );
        ensure!(
            self.retention_secs > 0,
            "Invalid config: retention_secs must be > 0"
        );
        ensure!(
            self.sweep_interval_secs > 0,
            "Invalid config: sweep_interval_secs must be > 0"
        );
        ensure!(
            self.history_limit > 0,
            "Invalid config: history_limit must be > 0"
        );
        ensure!(
            !self.access_key.trim().is_empty(),
            "Invalid config: access_key must not be empty"
        );
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Runtime overrides from the command line. Applied after loading, never
/// persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind: Option<BindScope>,
}

/// Durable settings store backed by one JSON document.
///
/// All writes funnel through [`ConfigStore::save`], which serializes writers
/// and replaces the document atomically. Readers take cheap snapshots.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    live: RwLock<Settings>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load settings from defaults, the config document, and the environment.
    ///
    /// A missing document is first-run: a starter document with a freshly
    /// generated access key is written out before layering. A document that
    /// exists but does not parse is surfaced as [`SetupError::CorruptConfig`].
    pub fn load(path: PathBuf) -> Result<Self, SetupError> {
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| SetupError::DataDir {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<serde_json::Value>(&raw).map_err(|e| {
                SetupError::CorruptConfig {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
        } else {
            let starter = Settings {
                access_key: Uuid::new_v4().simple().to_string(),
                ..Settings::default()
            };
            write_document(&path, &starter)?;
            tracing::info!(path = %path.display(), "wrote starter config with generated access key");
        }

        let settings = extract(&path)?;

        Ok(Self {
            path,
            live: RwLock::new(settings),
            write_lock: Mutex::new(()),
        })
    }

    /// Cheap snapshot of the live settings for request handlers.
    pub fn current(&self) -> Settings {
        let guard = match self.live.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("settings lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        };
        guard.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply command-line overrides to the live settings without persisting.
    pub fn apply_overrides(&self, overrides: &ConfigOverrides) {
        let mut guard = match self.live.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("settings lock poisoned during override, recovering");
                poisoned.into_inner()
            }
        };
        if let Some(port) = overrides.port {
            guard.port = port;
        }
        if let Some(bind) = overrides.bind {
            guard.bind = bind;
        }
    }

    /// Mutate the settings and persist the result. Concurrent updates are
    /// serialized, and the live settings only change once validation and the
    /// document write have both succeeded.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings, SetupError> {
        let _serialized = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut updated = self.current();
        f(&mut updated);
        updated
            .validate()
            .map_err(|e| SetupError::InvalidConfig(e.to_string()))?;
        write_document(&self.path, &updated)?;

        let mut guard = match self.live.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("settings lock poisoned during update, recovering");
                poisoned.into_inner()
            }
        };
        *guard = updated.clone();
        Ok(updated)
    }

    /// Persist the live settings as-is.
    pub fn save(&self) -> Result<(), SetupError> {
        let _serialized = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        write_document(&self.path, &self.current())
    }

    /// Re-run the load path against the same document and swap the result in.
    pub fn reload(&self) -> Result<(), SetupError> {
        let settings = extract(&self.path)?;
        let mut guard = match self.live.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("settings lock poisoned during reload, recovering");
                poisoned.into_inner()
            }
        };
        *guard = settings;
        Ok(())
    }
}

fn extract(path: &Path) -> Result<Settings, SetupError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()
        .map_err(|e| SetupError::InvalidConfig(e.to_string()))?;

    settings
        .validate()
        .map_err(|e| SetupError::InvalidConfig(e.to_string()))?;

    Ok(settings)
}

fn write_document(path: &Path, settings: &Settings) -> Result<(), SetupError> {
    let body = serde_json::to_string_pretty(settings)
        .map_err(|e| SetupError::InvalidConfig(e.to_string()))?;
    atomic_write(path, &body).map_err(|source| SetupError::WriteConfig {
        path: path.to_path_buf(),
        source,
    })
}
