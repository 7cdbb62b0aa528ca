//! Shared fixture for driving the HTTP surface with `tower::oneshot`.

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use lanboard::board::Board;
use lanboard::common::ConfigStore;
use lanboard::server::{create_router, AppState};
use lanboard::store::ContentStore;
use std::path::Path;
use std::sync::Arc;

pub const TEST_KEY: &str = "test-access-key";
pub const TEST_UPLOAD_LIMIT: u64 = 1024 * 1024; // 1MB
pub const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

/// Build the full application stack inside `dir`: config document, content
/// store, board history, and the router over all of it.
pub async fn create_test_app(dir: &Path) -> (Router, AppState) {
    let config = ConfigStore::load(dir.join("config.json")).expect("load config");
    config
        .update(|s| {
            s.access_key = TEST_KEY.to_string();
            s.max_upload_bytes = TEST_UPLOAD_LIMIT;
        })
        .expect("apply test settings");

    let store = ContentStore::open(dir.join("uploads"))
        .await
        .expect("open content store");
    let board = Board::open(dir.join("history.jsonl"), 100)
        .await
        .expect("open board");

    let state = AppState::new(Arc::new(config), Arc::new(store), Arc::new(board));
    let app = create_router(&state);
    (app, state)
}

/// Request with the test access key in the Authorization header.
pub fn authed_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TEST_KEY}"))
        .body(Body::empty())
        .expect("Failed to build request")
}

/// Request with no credentials at all.
pub fn bare_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

/// Multipart POST to `/api/upload` carrying one `file` field.
pub fn build_upload_request(
    key: Option<&str>,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    builder
        .body(Body::from(multipart_file_body(filename, content_type, data)))
        .expect("Failed to build upload request")
}

/// Raw multipart body with a single `file` field.
pub fn multipart_file_body(filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Collect a response body and parse it as JSON.
pub async fn extract_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Response body is not valid JSON")
}

/// Collect a response body as raw bytes.
pub async fn extract_bytes(response: Response) -> bytes::Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes()
}
