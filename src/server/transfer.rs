//! HTTP handlers for file upload, download, and board management.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::common::AppError;
use crate::server::auth::{self, AccessKey};
use crate::server::state::AppState;
use crate::store::{check_size_limit, FileMeta, NewUpload, UPLOAD_OVERHEAD_BYTES};

/// Store one multipart upload and return its download descriptor.
///
/// The body is streamed to disk chunk by chunk; nothing is buffered in
/// memory. Only the first field named `file` is consumed.
pub async fn upload_file(
    AccessKey(key): AccessKey,
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let settings = state.settings();
    auth::require_key(&key, &settings)?;

    // Content-Length covers the whole multipart body, so allow for framing
    // and form fields. The byte-accurate check happens per chunk in the store.
    if let Some(declared) = content_length(&headers) {
        check_size_limit(
            declared.saturating_sub(UPLOAD_OVERHEAD_BYTES),
            settings.max_upload_bytes,
        )?;
    }

    let _guard = state.begin_upload();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().unwrap_or("file").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let stream = futures::stream::try_unfold(field, |mut field| async move {
            let chunk = field.chunk().await.map_err(anyhow::Error::new)?;
            Ok(chunk.map(|bytes| (bytes, field)))
        });

        let upload = NewUpload {
            name: &name,
            declared_size: None,
            content_type: &content_type,
        };
        let meta = state
            .store
            .put(upload, settings.max_upload_bytes, Box::pin(stream))
            .await?;

        return Ok(Json(file_json(&meta)));
    }

    Err(AppError::BadRequest("missing file field".to_string()))
}

/// Stream a stored file back to the client.
///
/// No access key: the identity is an unguessable capability, which lets
/// plain `<img>`/`<a>` tags on the board work without header plumbing.
pub async fn download_file(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = state.store.get(&identity).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        handle
            .meta
            .content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(handle.meta.size));
    if let Ok(value) = attachment_disposition(&handle.meta.name).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    tracing::debug!(identity = %handle.meta.identity, size = handle.meta.size, "download_file");
    let body = Body::from_stream(ReaderStream::new(handle.file));
    Ok((headers, body))
}

/// Remove one stored file. Idempotent, like the store beneath it.
pub async fn delete_file(
    AccessKey(key): AccessKey,
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<StatusCode, AppError> {
    auth::require_key(&key, &state.settings())?;
    state.store.delete(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List all stored files, oldest first.
pub async fn list_files(
    AccessKey(key): AccessKey,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    auth::require_key(&key, &state.settings())?;
    let files: Vec<Value> = state.store.list().iter().map(file_json).collect();
    Ok(Json(json!({ "files": files })))
}

/// Remove one message from the board along with its attachment files.
/// Deleting an unknown id succeeds; the client may be working from a
/// stale history.
pub async fn delete_message(
    AccessKey(key): AccessKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    auth::require_key(&key, &state.settings())?;
    state.board.delete(&id, &state.store).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wipe the board: every message and every stored file.
pub async fn clear_board(
    AccessKey(key): AccessKey,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    auth::require_key(&key, &state.settings())?;

    let files_deleted = state.store.file_count();
    state.board.clear(&state.store).await?;

    Ok(Json(json!({ "cleared": true, "files_deleted": files_deleted })))
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// JSON descriptor for one stored file: shared by the upload response, the
/// file listing, and realtime completion frames.
pub(crate) fn file_json(meta: &FileMeta) -> Value {
    json!({
        "identity": meta.identity,
        "url": format!("/download/{}", meta.identity),
        "name": meta.name,
        "size": meta.size,
        "kind": meta.kind(),
        "sha256": meta.sha256,
    })
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Content-Disposition that survives non-ASCII filenames: an ASCII fallback
/// plus the RFC 5987 UTF-8 form when needed.
fn attachment_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let fallback = if fallback.trim().is_empty() {
        "file".to_string()
    } else {
        fallback
    };

    if name.is_ascii() {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            rfc5987_encode(name)
        )
    }
}

// Percent-encodes everything outside the RFC 5987 attr-char set.
fn rfc5987_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'!' | b'#' | b'$' | b'&' | b'+'
            | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
