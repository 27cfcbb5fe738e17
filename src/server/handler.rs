//! HTTP and WebSocket handlers.
//!
//! The WebSocket endpoint is the ingress for live connections; everything
//! under `/api` is chat administration and the read-only reporting surface.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    message::{DisplayMessage, QueueMessage, TEXT_MESSAGE},
    queue::MessagePublisher,
    registry::{ChatId, ChatSnapshot, Room, User},
};

use super::state::AppState;

/// Greeting frame sent to a connection right after registration.
const WELCOME_TEXT: &str = "Welcome to the chat!";

/// Query parameters for the WebSocket upgrade endpoint.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub room_id: ChatId,
}

/// Ingress: validate both ids against the registry, then upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(user) = state.registry.user(&query.user_id).await else {
        tracing::warn!("Rejected connection for unknown user '{}'", query.user_id);
        return Err(StatusCode::NOT_FOUND);
    };
    if !state.registry.chat_exists(query.room_id).await {
        tracing::warn!("Rejected connection for unknown chat {}", query.room_id);
        return Err(StatusCode::NOT_FOUND);
    }

    let chat_id = query.room_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user, chat_id)))
}

/// Register the connection, greet it, then run the receive loop until the
/// stream errors or closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: User, chat_id: ChatId) {
    let (mut sink, mut stream) = socket.split();

    // Frames queued for this client, drained by the send task below so a
    // slow client never stalls a broadcast worker.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // The chat may have been deleted between the lookup and the upgrade.
    let handle = match state.registry.add_connection(chat_id, &user.user_id, tx).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!("Failed to register connection: {}", e);
            return;
        }
    };
    tracing::info!(
        "User '{}' connected to chat {} as connection {}",
        user.user_id,
        chat_id,
        handle.id()
    );

    // Welcome frame goes to the new connection only.
    let welcome = DisplayMessage {
        msg: WELCOME_TEXT.to_string(),
        author: user.user_name.clone(),
    };
    match serde_json::to_string(&welcome) {
        Ok(frame) => {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                tracing::warn!("Failed to send welcome frame: {}", e);
            }
        }
        Err(e) => tracing::error!("Failed to encode welcome frame: {}", e),
    }

    // Send task: forward queued frames to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Receive loop: each inbound text frame is published to the durable
    // queue; the first read error or close ends the loop.
    let publisher = state.publisher.clone();
    let author = user.user_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::info!("Read failed on chat {} connection: {}", chat_id, e);
                    break;
                }
            };
            match frame {
                Message::Text(text) => {
                    publish_inbound(publisher.as_ref(), &author, chat_id, text.as_str()).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }

    // Single deregistration point, idempotent against a deleted chat.
    state.registry.remove_connection(&handle).await;
    tracing::info!("Connection {} on chat {} closed", handle.id(), chat_id);
}

/// Wrap one inbound frame as a queue record and publish it.
///
/// A publish failure drops the frame; the connection stays up and the client
/// may send again.
async fn publish_inbound(
    publisher: &dyn MessagePublisher,
    author: &str,
    chat_id: ChatId,
    text: &str,
) {
    let message = QueueMessage {
        msg: text.to_string(),
        author: author.to_string(),
        message_type: TEXT_MESSAGE,
        chat_id,
    };
    if let Err(e) = publisher.publish(&message).await {
        tracing::warn!("Failed to publish message for chat {}: {}", chat_id, e);
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Identity hand-off performed by the (external) authentication layer.
#[derive(Debug, Deserialize)]
pub struct EnterRequest {
    pub user_id: String,
    pub user_name: String,
}

/// Record an authenticated user entering the chat area. Idempotent.
pub async fn enter_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnterRequest>,
) -> (StatusCode, Json<User>) {
    let user = state.registry.upsert_user(&body.user_id, &body.user_name).await;
    (StatusCode::CREATED, Json(user))
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub chat_id: ChatId,
}

/// Create a room/chat pair under the next id.
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreateChatResponse>), StatusCode> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let chat_id = state.registry.create_chat(name).await;
    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id })))
}

/// Delete a chat. Idempotent: deleting an absent chat also answers 204.
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<ChatId>,
) -> StatusCode {
    state.registry.delete_chat(chat_id).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct RenameChatRequest {
    pub user_id: String,
    pub name: String,
}

/// Rename a chat and announce the new name through the normal pipeline.
pub async fn rename_chat(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<RenameChatRequest>,
) -> Result<Json<Room>, StatusCode> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let Some(user) = state.registry.user(&body.user_id).await else {
        return Err(StatusCode::NOT_FOUND);
    };
    let room = state
        .registry
        .rename_chat(chat_id, name)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let notice = format!("Chat renamed to '{}'", room.room_name);
    publish_inbound(state.publisher.as_ref(), &user.user_name, chat_id, &notice).await;
    Ok(Json(room))
}

/// List all chats with their connection and membership lists.
pub async fn get_chats(State(state): State<Arc<AppState>>) -> Json<Vec<ChatSnapshot>> {
    Json(state.registry.list_chats().await)
}

/// List all rooms.
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<Room>> {
    Json(state.registry.list_rooms().await)
}

/// List all known users.
pub async fn get_users(State(state): State<Arc<AppState>>) -> Json<Vec<User>> {
    Json(state.registry.list_users().await)
}
