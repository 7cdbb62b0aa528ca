//! WebSocket endpoint: board traffic and chunked uploads on one connection.
//!
//! Every client holds a single socket. The server pushes the full history on
//! connect and live board events after that; the client sends message posts
//! as JSON text frames and upload bytes as binary frames bracketed by
//! `upload-begin` / `upload-finish`. One upload at a time per connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::board::MessageDraft;
use crate::common::{AppError, HandshakeReason};
use crate::server::session::TransferSession;
use crate::server::state::{AppState, UploadGuard};
use crate::server::transfer::file_json;
use crate::store::{check_size_limit, FileMeta, NewUpload};

/// Chunks buffered between the socket and the store writer before the
/// socket read blocks.
const CHUNK_QUEUE_DEPTH: usize = 8;

#[derive(Deserialize)]
pub struct WsQuery {
    key: Option<String>,
}

/// Frames a client may send. Unknown or malformed frames get an `error`
/// frame back instead of closing the connection.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientFrame {
    Msg(MessageDraft),
    UploadBegin {
        name: String,
        size: u64,
        content_type: Option<String>,
    },
    UploadFinish,
}

/// One in-flight upload riding this connection. Chunks flow through the
/// mpsc queue into a spawned store task, so a slow disk backpressures the
/// socket instead of buffering the file in memory.
struct UploadPipe {
    session: TransferSession,
    declared: u64,
    sender: Option<mpsc::Sender<Bytes>>,
    task: JoinHandle<Result<FileMeta, AppError>>,
    _guard: UploadGuard,
}

/// Gate the websocket handshake and hand accepted sockets to the client
/// loop. Rejections carry a structured JSON body instead of a bare status,
/// since a failing handshake is otherwise invisible to browser consoles.
pub async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Option<WebSocketUpgrade>,
    Query(query): Query<WsQuery>,
) -> Response {
    let settings = state.settings();

    let Some(key) = query.key else {
        return handshake_error(HandshakeReason::MissingKey);
    };
    if key != settings.access_key {
        return handshake_error(HandshakeReason::InvalidKey);
    }
    let Some(upgrade) = upgrade else {
        return handshake_error(HandshakeReason::MalformedRequest);
    };

    upgrade.on_upgrade(move |socket| client_loop(socket, state))
}

fn handshake_error(reason: HandshakeReason) -> Response {
    let status = match reason {
        HandshakeReason::MissingKey | HandshakeReason::InvalidKey => StatusCode::UNAUTHORIZED,
        HandshakeReason::MalformedRequest => StatusCode::BAD_REQUEST,
    };

    tracing::warn!(reason = reason.as_str(), "websocket handshake rejected");
    let body = Json(json!({
        "type": "handshake-error",
        "reason": reason,
        "message": reason.message(),
    }));
    (status, body).into_response()
}

async fn client_loop(mut socket: WebSocket, state: AppState) {
    if send_history(&mut socket, &state).await.is_err() {
        return;
    }

    let mut events = state.board.subscribe();
    let mut pipe: Option<UploadPipe> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(frame)) = incoming else { break };
                let ok = match frame {
                    Message::Text(raw) => {
                        handle_text(&mut socket, &state, &mut pipe, &raw).await
                    }
                    Message::Binary(chunk) => {
                        handle_chunk(&mut socket, &mut pipe, Bytes::from(chunk)).await
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => Ok(()),
                };
                if ok.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if send_json(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Too slow for the live feed: resync from scratch.
                        tracing::warn!(skipped, "client lagged behind board events, resending history");
                        if send_history(&mut socket, &state).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(pipe) = pipe.take() {
        let (mut session, _) = settle(pipe).await;
        session.abort();
    }
    tracing::debug!("websocket client disconnected");
}

async fn handle_text(
    socket: &mut WebSocket,
    state: &AppState,
    pipe: &mut Option<UploadPipe>,
    raw: &str,
) -> Result<(), axum::Error> {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable client frame");
            return send_error(socket, "unrecognized frame").await;
        }
    };

    match frame {
        ClientFrame::Msg(draft) => {
            let settings = state.settings();
            match state
                .board
                .post(draft, &state.store, settings.max_upload_bytes)
                .await
            {
                // The event subscription delivers the published message.
                Ok(_) => Ok(()),
                Err(AppError::BadRequest(msg)) => send_error(socket, &msg).await,
                Err(err) => {
                    tracing::error!(error = %err, "failed to post message");
                    send_error(socket, "failed to post message").await
                }
            }
        }
        ClientFrame::UploadBegin {
            name,
            size,
            content_type,
        } => begin_upload(socket, state, pipe, name, size, content_type).await,
        ClientFrame::UploadFinish => finish_upload(socket, pipe).await,
    }
}

async fn begin_upload(
    socket: &mut WebSocket,
    state: &AppState,
    pipe: &mut Option<UploadPipe>,
    name: String,
    size: u64,
    content_type: Option<String>,
) -> Result<(), axum::Error> {
    if pipe.is_some() {
        return send_failed(
            socket,
            None,
            "busy",
            "an upload is already in progress on this connection",
        )
        .await;
    }

    let mut session = TransferSession::new();
    session.begin_handshake();

    let settings = state.settings();
    if let Err(err) = check_size_limit(size, settings.max_upload_bytes) {
        session.fail();
        let (reason, message) = failure_reason(&err);
        return send_failed(socket, Some(session.id()), reason, &message).await;
    }

    let guard = state.begin_upload();
    let (tx, rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE_DEPTH);
    let store = state.store.clone();
    let limit = settings.max_upload_bytes;
    let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    let task = tokio::spawn(async move {
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|bytes| (anyhow::Ok(bytes), rx))
        });
        let upload = NewUpload {
            name: &name,
            declared_size: Some(size),
            content_type: &content_type,
        };
        store.put(upload, limit, Box::pin(stream)).await
    });

    session.activate();
    let accepted = json!({ "type": "accepted", "session": session.id() });
    *pipe = Some(UploadPipe {
        session,
        declared: size,
        sender: Some(tx),
        task,
        _guard: guard,
    });
    send_json(socket, &accepted).await
}

async fn handle_chunk(
    socket: &mut WebSocket,
    pipe_slot: &mut Option<UploadPipe>,
    chunk: Bytes,
) -> Result<(), axum::Error> {
    let n = chunk.len() as u64;

    let overrun = match pipe_slot.as_ref() {
        None => return send_error(socket, "binary frame outside an upload").await,
        Some(pipe) => pipe.session.bytes() + n > pipe.declared,
    };

    // More bytes than declared: stop feeding the store and fail here,
    // before the store has to detect the mismatch on its own.
    if overrun {
        if let Some(pipe) = pipe_slot.take() {
            let (mut session, _) = settle(pipe).await;
            session.fail();
            return send_failed(
                socket,
                Some(session.id()),
                "rejected",
                "received more bytes than declared",
            )
            .await;
        }
        return Ok(());
    }

    let sent = match pipe_slot.as_ref().and_then(|p| p.sender.as_ref()) {
        Some(sender) => sender.send(chunk).await,
        None => return Ok(()),
    };

    match sent {
        Ok(()) => {
            if let Some(pipe) = pipe_slot.as_mut() {
                pipe.session.add_bytes(n);
                let frame = json!({
                    "type": "progress",
                    "session": pipe.session.id(),
                    "bytes": pipe.session.bytes(),
                });
                return send_json(socket, &frame).await;
            }
            Ok(())
        }
        // The store task dropped its receiver, so it has already settled
        // with an error. Surface it.
        Err(_) => {
            if let Some(pipe) = pipe_slot.take() {
                let (mut session, result) = settle(pipe).await;
                session.fail();
                let err = match result {
                    Err(err) => err,
                    Ok(_) => AppError::Storage(anyhow::anyhow!("upload pipe closed unexpectedly")),
                };
                let (reason, message) = failure_reason(&err);
                return send_failed(socket, Some(session.id()), reason, &message).await;
            }
            Ok(())
        }
    }
}

async fn finish_upload(
    socket: &mut WebSocket,
    pipe_slot: &mut Option<UploadPipe>,
) -> Result<(), axum::Error> {
    let Some(pipe) = pipe_slot.take() else {
        return send_error(socket, "no upload in progress").await;
    };

    let (mut session, result) = settle(pipe).await;
    match result {
        Ok(meta) => {
            session.complete(meta.identity.clone());
            send_json(
                socket,
                &json!({
                    "type": "completed",
                    "session": session.id(),
                    "file": file_json(&meta),
                }),
            )
            .await
        }
        Err(err) => {
            session.fail();
            let (reason, message) = failure_reason(&err);
            send_failed(socket, Some(session.id()), reason, &message).await
        }
    }
}

/// Close the chunk queue and wait for the store task to settle. The upload
/// guard inside the pipe drops here, after the store side is done.
async fn settle(mut pipe: UploadPipe) -> (TransferSession, Result<FileMeta, AppError>) {
    pipe.sender.take();
    let result = match pipe.task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "upload task failed");
            Err(AppError::Storage(anyhow::anyhow!("upload task failed")))
        }
    };
    (pipe.session, result)
}

/// Wire reason code plus human message for a failed upload. Internal errors
/// are logged here and reported generically, same as the HTTP boundary.
fn failure_reason(err: &AppError) -> (&'static str, String) {
    match err {
        AppError::PayloadTooLarge { .. } => ("too_large", err.to_string()),
        AppError::BadRequest(msg) => ("rejected", msg.clone()),
        AppError::InsufficientStorage(msg) => ("no_space", msg.clone()),
        AppError::Storage(e) => {
            tracing::error!(error = format!("{e:#}"), "upload failed in storage");
            ("storage", "internal error".to_string())
        }
        _ => ("storage", "internal error".to_string()),
    }
}

async fn send_history(socket: &mut WebSocket, state: &AppState) -> Result<(), axum::Error> {
    let items = state.board.snapshot().await;
    send_json(socket, &json!({ "type": "history", "items": items })).await
}

async fn send_error(socket: &mut WebSocket, message: &str) -> Result<(), axum::Error> {
    send_json(socket, &json!({ "type": "error", "message": message })).await
}

async fn send_failed(
    socket: &mut WebSocket,
    session: Option<&str>,
    reason: &str,
    message: &str,
) -> Result<(), axum::Error> {
    send_json(
        socket,
        &json!({
            "type": "failed",
            "session": session,
            "reason": reason,
            "message": message,
        }),
    )
    .await
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize outbound frame");
            Ok(())
        }
    }
}
