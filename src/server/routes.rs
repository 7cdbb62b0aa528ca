//! Router definition for the board, transfer, and realtime endpoints.

use axum::{extract::DefaultBodyLimit, routing::*, Router};

use crate::server::state::AppState;
use crate::server::{realtime, transfer};
use crate::store::UPLOAD_OVERHEAD_BYTES;
use crate::ui::web;

/// Build the application router. The body cap tracks the configured upload
/// limit plus multipart overhead; the byte-accurate enforcement lives in the
/// content store.
pub fn create_router(state: &AppState) -> Router {
    let body_cap = state.settings().max_upload_bytes + UPLOAD_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(transfer::health_check))
        .route("/", get(|| async { web::serve_board_page() }))
        .route("/board.js", get(|| async { web::serve_board_js() }))
        .route("/styles.css", get(|| async { web::serve_shared_css() }))
        .route("/api/upload", post(transfer::upload_file))
        .route("/api/files", get(transfer::list_files))
        .route("/api/files/:identity", delete(transfer::delete_file))
        .route("/api/messages/:id", delete(transfer::delete_message))
        .route("/api/clear", post(transfer::clear_board))
        .route("/download/:identity", get(transfer::download_file))
        .route("/ws", get(realtime::ws_handler))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_cap as usize))
}
