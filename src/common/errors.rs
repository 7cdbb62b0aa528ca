//! Error types shared across startup, HTTP handlers, and the realtime channel.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal startup failures. Reported once and the process exits; nothing here
/// is ever translated into an HTTP response.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot prepare data directory {}", path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data directory {} is not writable", path.display())]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config document exists but does not parse. Deliberately not
    /// auto-repaired: a rebuilt default file would silently replace the
    /// access key and retention settings.
    #[error("config file {} is corrupt ({reason}); fix or remove it, then restart", path.display())]
    CorruptConfig { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot write {}", path.display())]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot listen on {addr} (is another lanboard instance already running?)")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Request-level failures, mapped onto HTTP status codes at the router
/// boundary. `Storage` wraps internal errors: logged in full, returned to the
/// client as a generic 500.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upload exceeds the {limit_bytes} byte limit")]
    PayloadTooLarge { limit_bytes: u64 },

    #[error("{0}")]
    InsufficientStorage(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            AppError::InsufficientStorage(msg) => (StatusCode::INSUFFICIENT_STORAGE, msg.clone()),
            AppError::Storage(err) => {
                tracing::error!(error = format!("{err:#}"), "internal storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Machine-readable reason codes for rejected realtime handshakes. Serialized
/// into the diagnostic payload and logged, so a failing client can be
/// debugged from either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeReason {
    MissingKey,
    InvalidKey,
    MalformedRequest,
}

impl HandshakeReason {
    pub fn message(&self) -> &'static str {
        match self {
            HandshakeReason::MissingKey => "no access key supplied; pass ?key=<access key>",
            HandshakeReason::InvalidKey => "access key does not match",
            HandshakeReason::MalformedRequest => "request is not a valid websocket upgrade",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeReason::MissingKey => "missing_key",
            HandshakeReason::InvalidKey => "invalid_key",
            HandshakeReason::MalformedRequest => "malformed_request",
        }
    }
}
