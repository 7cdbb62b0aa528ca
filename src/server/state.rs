use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::board::Board;
use crate::common::{ConfigStore, Settings};
use crate::store::ContentStore;

/// Shared handles for every request handler. Cheap to clone; all fields
/// are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub store: Arc<ContentStore>,
    pub board: Arc<Board>,
    active_uploads: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: Arc<ConfigStore>, store: Arc<ContentStore>, board: Arc<Board>) -> Self {
        Self {
            config,
            store,
            board,
            active_uploads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Snapshot of the live settings. Handlers read once per request so a
    /// concurrent config update cannot change limits mid-transfer.
    pub fn settings(&self) -> Settings {
        self.config.current()
    }

    /// Register an in-flight upload. The returned guard decrements the
    /// counter on drop, including on error and panic paths, so shutdown
    /// draining never waits on a transfer that already died.
    pub fn begin_upload(&self) -> UploadGuard {
        self.active_uploads.fetch_add(1, Ordering::SeqCst);
        UploadGuard {
            counter: self.active_uploads.clone(),
        }
    }

    pub fn active_uploads(&self) -> usize {
        self.active_uploads.load(Ordering::SeqCst)
    }
}

pub struct UploadGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
