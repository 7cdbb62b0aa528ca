//! Server lifecycle: bind, announce, background sweeper, graceful shutdown.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::common::{BindScope, Settings, SetupError};
use crate::server::state::AppState;
use crate::store::spawn_sweeper;

fn bind_addr(scope: BindScope, port: u16) -> SocketAddr {
    match scope {
        BindScope::Loopback => SocketAddr::from(([127, 0, 0, 1], port)),
        BindScope::All => SocketAddr::from(([0, 0, 0, 0], port)),
    }
}

/// Bind the listener and spawn the HTTP server, returning `(bound_port,
/// handle)`. Port 0 asks the OS for a free one.
pub fn start_server(
    app: axum::Router,
    scope: BindScope,
    port: u16,
) -> Result<(u16, axum_server::Handle), SetupError> {
    let addr = bind_addr(scope, port);
    let listener =
        std::net::TcpListener::bind(addr).map_err(|source| SetupError::Bind { addr, source })?;

    listener
        .set_nonblocking(true)
        .map_err(|source| SetupError::Bind { addr, source })?;

    let port = listener
        .local_addr()
        .map_err(|source| SetupError::Bind { addr, source })?
        .port();

    let handle = axum_server::Handle::new();
    let serve_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = axum_server::from_tcp(listener)
            .handle(serve_handle)
            .serve(app.into_make_service())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((port, handle))
}

/// Best-effort local non-loopback IP discovery for the announce banner.
pub fn get_local_ip() -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind socket for IP detection")?;

    socket
        .connect("8.8.8.8:80")
        .context("Failed to connect socket for IP detection")?;

    let local_addr = socket.local_addr().context("Failed to get local address")?;

    Ok(local_addr.ip().to_string())
}

/// Run the server until Ctrl+C: announce the URL, keep the expiry sweeper
/// running, then drain in-flight uploads and stop.
pub async fn serve(state: AppState, app: axum::Router) -> Result<()> {
    let settings = state.settings();
    let (port, server_handle) = start_server(app, settings.bind, settings.port)?;

    announce(&settings, port);

    let root_token = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.store.clone(),
        state.config.clone(),
        root_token.child_token(),
    );

    // First Ctrl+C cancels the root token and begins the drain
    let signal_token = root_token.clone();
    let ctrl_c_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Ctrl+C received - initiating graceful shutdown");
        signal_token.cancel();
    });

    root_token.cancelled().await;

    // Stop the first-stage signal handler before drain installs its own
    ctrl_c_task.abort();
    let _ = ctrl_c_task.await;

    // No new connections; existing ones keep running while uploads drain
    server_handle.graceful_shutdown(None);
    tracing::info!("Server stopped accepting new connections");

    match drain_uploads(&state).await {
        ShutdownResult::Completed => tracing::info!("All uploads completed"),
        ShutdownResult::Forced => {
            tracing::warn!(
                "Forced shutdown with {} pending upload(s)",
                state.active_uploads()
            );
        }
    }

    // Cut whatever connections remain (idle board clients)
    server_handle.shutdown();
    let _ = sweeper.await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Print where the board is reachable. This is the one thing a user needs
/// at startup, so it goes to stdout rather than the log.
fn announce(settings: &Settings, port: u16) {
    let host = match settings.bind {
        BindScope::Loopback => "127.0.0.1".to_string(),
        BindScope::All => get_local_ip().unwrap_or_else(|_| "127.0.0.1".to_string()),
    };

    println!("Board is up:");
    println!("  http://{host}:{port}/?key={}", settings.access_key);
    if settings.bind == BindScope::All {
        println!("Anyone on your network with this link can read and post.");
    }
}

enum ShutdownResult {
    Completed,
    Forced,
}

/// Wait for in-flight uploads to settle, or force quit on a second Ctrl+C.
async fn drain_uploads(state: &AppState) -> ShutdownResult {
    if state.active_uploads() == 0 {
        return ShutdownResult::Completed;
    }

    let mut last_count = state.active_uploads();
    tracing::info!(count = last_count, "waiting for in-flight uploads");

    loop {
        tokio::select! {
            // Ctrl+C during drain = force quit
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!("Force shutdown requested");
                    return ShutdownResult::Forced;
                }
            }

            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let current = state.active_uploads();
                if current == 0 {
                    return ShutdownResult::Completed;
                }
                if current != last_count {
                    tracing::info!("{} upload(s) remaining...", current);
                    last_count = current;
                }
            }
        }
    }
}
