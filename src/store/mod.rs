pub mod content;
pub mod meta;
pub mod sweeper;

pub use content::{check_size_limit, ContentStore, FileHandle, NewUpload, UPLOAD_OVERHEAD_BYTES};
pub use meta::{FileKind, FileMeta};
pub use sweeper::{spawn_sweeper, sweep, SweepStats};
