//! Request extractors and access-key gating for server endpoints.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::common::{AppError, Settings};

/// Access key presented by a client, from `Authorization: Bearer <key>` or
/// a `?key=<key>` query parameter. The query form exists for browser
/// contexts that cannot set headers (WebSocket handshakes, plain links).
pub struct AccessKey(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AccessKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) {
            let header = header
                .to_str()
                .map_err(|_| AppError::Unauthorized("invalid authorization header".to_string()))?;

            let key = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| AppError::Unauthorized("invalid authorization header".to_string()))?;

            if key.trim().is_empty() {
                return Err(AppError::Unauthorized(
                    "invalid authorization header".to_string(),
                ));
            }

            return Ok(AccessKey(key.to_string()));
        }

        parts
            .uri
            .query()
            .and_then(key_from_query)
            .map(AccessKey)
            .ok_or_else(|| AppError::Unauthorized("missing access key".to_string()))
    }
}

/// Pull `key=<value>` out of a raw query string. Keys are plain hex, so no
/// percent-decoding is needed.
pub fn key_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("key="))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Require that the presented key matches the configured one.
pub fn require_key(provided: &str, settings: &Settings) -> Result<(), AppError> {
    if provided != settings.access_key {
        return Err(AppError::Unauthorized("invalid access key".to_string()));
    }
    Ok(())
}
