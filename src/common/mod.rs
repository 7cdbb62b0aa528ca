pub mod config;
pub mod errors;
pub mod fsio;
pub mod paths;

pub use config::{BindScope, ConfigOverrides, ConfigStore, Settings};
pub use errors::{AppError, HandshakeReason, SetupError};
pub use paths::AppPaths;
