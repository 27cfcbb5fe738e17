//! Server execution logic.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::{
    handler::{
        create_chat, delete_chat, enter_user, get_chats, get_rooms, get_users, health_check,
        rename_chat, websocket_handler,
    },
    state::AppState,
};

/// Build the HTTP/WebSocket router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/health", get(health_check))
        .route("/api/users", post(enter_user).get(get_users))
        .route("/api/rooms", get(get_rooms))
        .route("/api/chats", post(create_chat).get(get_chats))
        .route(
            "/api/chats/{chat_id}",
            axum::routing::put(rename_chat).delete(delete_chat),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the chat server until the shutdown signal fires.
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = app(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Chat server listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/ws", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Resolve when the process is asked to stop, logging which signal fired.
///
/// In-flight requests and upgraded connections drain through axum's graceful
/// shutdown once this future completes.
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("SIGTERM handler installation failed");

    #[cfg(unix)]
    let terminate = sigterm.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.expect("Ctrl+C handler installation failed");
            tracing::info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down");
        }
    }
}
