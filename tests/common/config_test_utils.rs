use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    port: Option<std::ffi::OsString>,
    bind: Option<std::ffi::OsString>,
    access_key: Option<std::ffi::OsString>,
    max_upload_bytes: Option<std::ffi::OsString>,
    retention_secs: Option<std::ffi::OsString>,
    sweep_interval_secs: Option<std::ffi::OsString>,
    history_limit: Option<std::ffi::OsString>,
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        if let Some(value) = self.port.take() {
            std::env::set_var("LANBOARD_PORT", value);
        } else {
            std::env::remove_var("LANBOARD_PORT");
        }

        if let Some(value) = self.bind.take() {
            std::env::set_var("LANBOARD_BIND", value);
        } else {
            std::env::remove_var("LANBOARD_BIND");
        }

        if let Some(value) = self.access_key.take() {
            std::env::set_var("LANBOARD_ACCESS_KEY", value);
        } else {
            std::env::remove_var("LANBOARD_ACCESS_KEY");
        }

        if let Some(value) = self.max_upload_bytes.take() {
            std::env::set_var("LANBOARD_MAX_UPLOAD_BYTES", value);
        } else {
            std::env::remove_var("LANBOARD_MAX_UPLOAD_BYTES");
        }

        if let Some(value) = self.retention_secs.take() {
            std::env::set_var("LANBOARD_RETENTION_SECS", value);
        } else {
            std::env::remove_var("LANBOARD_RETENTION_SECS");
        }

        if let Some(value) = self.sweep_interval_secs.take() {
            std::env::set_var("LANBOARD_SWEEP_INTERVAL_SECS", value);
        } else {
            std::env::remove_var("LANBOARD_SWEEP_INTERVAL_SECS");
        }

        if let Some(value) = self.history_limit.take() {
            std::env::set_var("LANBOARD_HISTORY_LIMIT", value);
        } else {
            std::env::remove_var("LANBOARD_HISTORY_LIMIT");
        }
    }
}

/// Run `f` with a clean `LANBOARD_*` environment and, when given, a config
/// document already on disk. The closure receives the config path; tests may
/// set environment variables inside it and they are restored afterwards.
pub fn with_config_env<T>(config_json: Option<&str>, f: impl FnOnce(&Path) -> T) -> T {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().expect("temp dir");
    let config_path = temp_dir.path().join("config.json");

    if let Some(contents) = config_json {
        std::fs::write(&config_path, contents).expect("write config");
    }

    let restore = EnvRestore {
        port: std::env::var_os("LANBOARD_PORT"),
        bind: std::env::var_os("LANBOARD_BIND"),
        access_key: std::env::var_os("LANBOARD_ACCESS_KEY"),
        max_upload_bytes: std::env::var_os("LANBOARD_MAX_UPLOAD_BYTES"),
        retention_secs: std::env::var_os("LANBOARD_RETENTION_SECS"),
        sweep_interval_secs: std::env::var_os("LANBOARD_SWEEP_INTERVAL_SECS"),
        history_limit: std::env::var_os("LANBOARD_HISTORY_LIMIT"),
    };

    std::env::remove_var("LANBOARD_PORT");
    std::env::remove_var("LANBOARD_BIND");
    std::env::remove_var("LANBOARD_ACCESS_KEY");
    std::env::remove_var("LANBOARD_MAX_UPLOAD_BYTES");
    std::env::remove_var("LANBOARD_RETENTION_SECS");
    std::env::remove_var("LANBOARD_SWEEP_INTERVAL_SECS");
    std::env::remove_var("LANBOARD_HISTORY_LIMIT");

    let result = f(&config_path);
    drop(restore);
    result
}
