//! In-memory registry of users, rooms, chats and live connections.
//!
//! The registry is the authoritative source of truth for who exists, which
//! chats exist, and which connections are currently registered in each chat.
//! It is mutated concurrently by ingress registration, receive-loop cleanup
//! and worker lookups, so all state sits behind a single mutex.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// Identifier shared by a room and its chat (1:1 pairing).
pub type ChatId = u64;

/// Identifier of one live connection.
pub type ConnectionId = u64;

/// Registry lookup and registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),
    #[error("user '{0}' not found")]
    UserNotFound(String),
}

/// Write failure on a connection whose send task has gone away.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// A user known to the chat area. Created on first entry, never deleted
/// in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub user_id: String,
    pub user_name: String,
}

/// Display metadata of a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub room_id: ChatId,
    pub room_name: String,
}

/// Handle to one live client connection.
///
/// Broadcast workers write outbound frames through it; the owning receive
/// loop deregisters with it when the stream ends. Frames go into the
/// connection's own unbounded channel, drained by its send task, so a slow
/// client never stalls the caller.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    chat_id: ChatId,
    user_id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue one outbound frame for this connection.
    pub fn send(&self, frame: String) -> Result<(), ConnectionClosed> {
        self.sender
            .send(frame)
            .map_err(|_| ConnectionClosed(self.id))
    }
}

/// Membership and connection lists of one chat.
#[derive(Debug)]
struct Chat {
    room: Room,
    connections: Vec<ConnectionHandle>,
    user_ids: Vec<String>,
}

/// Read-only projection of one chat for the reporting surface.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSnapshot {
    pub chat_id: ChatId,
    pub room: Room,
    pub connections: Vec<ConnectionId>,
    pub user_ids: Vec<String>,
}

struct Inner {
    users: HashMap<String, User>,
    rooms: HashMap<ChatId, Room>,
    chats: HashMap<ChatId, Chat>,
    /// Shared auto-increment for room and chat ids, starting at 1.
    next_chat_id: ChatId,
    next_connection_id: ConnectionId,
}

/// Shared registry; construct once at startup and inject where needed.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                users: HashMap::new(),
                rooms: HashMap::new(),
                chats: HashMap::new(),
                next_chat_id: 1,
                next_connection_id: 1,
            }),
        }
    }

    /// Record a user entering the chat area, refreshing the display name of
    /// a returning one. Idempotent.
    pub async fn upsert_user(&self, user_id: &str, user_name: &str) -> User {
        let mut inner = self.inner.lock().await;
        let user = User {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        };
        inner.users.insert(user_id.to_string(), user.clone());
        tracing::debug!("User '{}' ('{}') registered", user_id, user_name);
        user
    }

    pub async fn user(&self, user_id: &str) -> Option<User> {
        let inner = self.inner.lock().await;
        inner.users.get(user_id).cloned()
    }

    /// Allocate the next id and insert an empty room/chat pair under it.
    pub async fn create_chat(&self, name: &str) -> ChatId {
        let mut inner = self.inner.lock().await;
        let chat_id = inner.next_chat_id;
        inner.next_chat_id += 1;

        let room = Room {
            room_id: chat_id,
            room_name: name.to_string(),
        };
        inner.rooms.insert(chat_id, room.clone());
        inner.chats.insert(
            chat_id,
            Chat {
                room,
                connections: Vec::new(),
                user_ids: Vec::new(),
            },
        );

        tracing::info!("Chat {} ('{}') created", chat_id, name);
        chat_id
    }

    /// Remove a chat and its room, reporting whether the chat existed.
    /// Deleting an absent chat is a no-op.
    pub async fn delete_chat(&self, chat_id: ChatId) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.chats.remove(&chat_id).is_some();
        inner.rooms.remove(&chat_id);
        if removed {
            tracing::info!("Chat {} deleted", chat_id);
        } else {
            tracing::debug!("Chat {} already absent", chat_id);
        }
        removed
    }

    /// Change the display name of a chat's room.
    pub async fn rename_chat(&self, chat_id: ChatId, name: &str) -> Result<Room, RegistryError> {
        let mut inner = self.inner.lock().await;
        let room = inner
            .rooms
            .get_mut(&chat_id)
            .ok_or(RegistryError::ChatNotFound(chat_id))?;
        room.room_name = name.to_string();
        let room = room.clone();
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            chat.room = room.clone();
        }
        tracing::info!("Chat {} renamed to '{}'", chat_id, name);
        Ok(room)
    }

    pub async fn chat_exists(&self, chat_id: ChatId) -> bool {
        let inner = self.inner.lock().await;
        inner.chats.contains_key(&chat_id)
    }

    /// Register a live connection under its chat. The returned handle is the
    /// identity used for both broadcast writes and deregistration.
    pub async fn add_connection(
        &self,
        chat_id: ChatId,
        user_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<ConnectionHandle, RegistryError> {
        let mut inner = self.inner.lock().await;
        if !inner.chats.contains_key(&chat_id) {
            return Err(RegistryError::ChatNotFound(chat_id));
        }
        if !inner.users.contains_key(user_id) {
            return Err(RegistryError::UserNotFound(user_id.to_string()));
        }

        let id = inner.next_connection_id;
        inner.next_connection_id += 1;
        let handle = ConnectionHandle {
            id,
            chat_id,
            user_id: user_id.to_string(),
            sender,
        };
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            chat.connections.push(handle.clone());
            chat.user_ids.push(user_id.to_string());
        }

        tracing::debug!(
            "Connection {} registered for user '{}' in chat {}",
            id,
            user_id,
            chat_id
        );
        Ok(handle)
    }

    /// Deregister a connection and one membership entry for its user.
    ///
    /// Quiet when the chat was deleted concurrently: the chat's lists are
    /// already gone, so there is nothing left to clean up.
    pub async fn remove_connection(&self, handle: &ConnectionHandle) {
        let mut inner = self.inner.lock().await;
        let Some(chat) = inner.chats.get_mut(&handle.chat_id) else {
            tracing::debug!(
                "Chat {} already gone, nothing to deregister for connection {}",
                handle.chat_id,
                handle.id
            );
            return;
        };

        if let Some(pos) = chat.connections.iter().position(|c| c.id == handle.id) {
            chat.connections.remove(pos);
        }
        if let Some(pos) = chat.user_ids.iter().position(|u| u == &handle.user_id) {
            chat.user_ids.remove(pos);
        }
        tracing::debug!(
            "Connection {} deregistered from chat {}",
            handle.id,
            handle.chat_id
        );
    }

    /// Current broadcast targets of a chat, or `None` when it was deleted.
    pub async fn connections_for(&self, chat_id: ChatId) -> Option<Vec<ConnectionHandle>> {
        let inner = self.inner.lock().await;
        inner
            .chats
            .get(&chat_id)
            .map(|chat| chat.connections.clone())
    }

    /// Snapshot of all chats, ordered by id.
    pub async fn list_chats(&self) -> Vec<ChatSnapshot> {
        let inner = self.inner.lock().await;
        let mut chats: Vec<ChatSnapshot> = inner
            .chats
            .iter()
            .map(|(chat_id, chat)| ChatSnapshot {
                chat_id: *chat_id,
                room: chat.room.clone(),
                connections: chat.connections.iter().map(|c| c.id).collect(),
                user_ids: chat.user_ids.clone(),
            })
            .collect();
        chats.sort_by_key(|c| c.chat_id);
        chats
    }

    /// Snapshot of all rooms, ordered by id.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let inner = self.inner.lock().await;
        let mut rooms: Vec<Room> = inner.rooms.values().cloned().collect();
        rooms.sort_by_key(|r| r.room_id);
        rooms
    }

    /// Snapshot of all users, ordered by id.
    pub async fn list_users(&self) -> Vec<User> {
        let inner = self.inner.lock().await;
        let mut users: Vec<User> = inner.users.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_sender() -> mpsc::UnboundedSender<String> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    async fn registry_with_user(user_id: &str) -> Registry {
        let registry = Registry::new();
        registry.upsert_user(user_id, user_id).await;
        registry
    }

    #[tokio::test]
    async fn test_create_chat_assigns_monotonic_ids() {
        // given:
        let registry = Registry::new();

        // when:
        let first = registry.create_chat("general").await;
        let second = registry.create_chat("random").await;
        registry.delete_chat(first).await;
        let third = registry.create_chat("dev").await;

        // then: ids are strictly increasing and never reused
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
    }

    #[tokio::test]
    async fn test_create_chat_inserts_room_and_chat() {
        // given:
        let registry = Registry::new();

        // when:
        let chat_id = registry.create_chat("general").await;

        // then: room and chat share one id
        let rooms = registry.list_rooms().await;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, chat_id);
        assert_eq!(rooms[0].room_name, "general");

        let chats = registry.list_chats().await;
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].chat_id, chat_id);
        assert!(chats[0].connections.is_empty());
        assert!(chats[0].user_ids.is_empty());
    }

    #[tokio::test]
    async fn test_delete_chat_is_idempotent() {
        // given:
        let registry = Registry::new();
        let chat_id = registry.create_chat("general").await;

        // when / then: only the first delete finds the chat, the repeats are
        // quiet no-ops
        assert!(registry.delete_chat(chat_id).await);
        assert!(!registry.delete_chat(chat_id).await);
        assert!(!registry.delete_chat(99).await);

        assert!(registry.list_chats().await.is_empty());
        assert!(registry.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_connection_unknown_chat() {
        // given:
        let registry = registry_with_user("alice").await;

        // when:
        let result = registry.add_connection(42, "alice", frame_sender()).await;

        // then:
        assert_eq!(result.unwrap_err(), RegistryError::ChatNotFound(42));
    }

    #[tokio::test]
    async fn test_add_connection_unknown_user() {
        // given:
        let registry = Registry::new();
        let chat_id = registry.create_chat("general").await;

        // when:
        let result = registry
            .add_connection(chat_id, "nobody", frame_sender())
            .await;

        // then:
        assert_eq!(
            result.unwrap_err(),
            RegistryError::UserNotFound("nobody".to_string())
        );
    }

    #[tokio::test]
    async fn test_add_then_remove_connection_restores_lists() {
        // given:
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;

        // when: register and then deregister the same connection
        let handle = registry
            .add_connection(chat_id, "alice", frame_sender())
            .await
            .unwrap();

        let during = registry.list_chats().await;
        assert_eq!(during[0].connections, vec![handle.id()]);
        assert_eq!(during[0].user_ids, vec!["alice".to_string()]);

        registry.remove_connection(&handle).await;

        // then: both lists are back to their original length and membership
        let after = registry.list_chats().await;
        assert!(after[0].connections.is_empty());
        assert!(after[0].user_ids.is_empty());
    }

    #[tokio::test]
    async fn test_connection_appears_at_most_once() {
        // given: the same user joins the same chat twice
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;
        let first = registry
            .add_connection(chat_id, "alice", frame_sender())
            .await
            .unwrap();
        let second = registry
            .add_connection(chat_id, "alice", frame_sender())
            .await
            .unwrap();

        // when: one of the two connections is deregistered
        registry.remove_connection(&first).await;

        // then: only that connection is gone, the other is untouched
        assert_ne!(first.id(), second.id());
        let chats = registry.list_chats().await;
        assert_eq!(chats[0].connections, vec![second.id()]);
        assert_eq!(chats[0].user_ids, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_connection_after_chat_deleted_is_quiet() {
        // given:
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;
        let handle = registry
            .add_connection(chat_id, "alice", frame_sender())
            .await
            .unwrap();

        // when: the chat is deleted before the connection's cleanup runs
        registry.delete_chat(chat_id).await;
        registry.remove_connection(&handle).await;

        // then: no panic, and the chat stays gone
        assert!(!registry.chat_exists(chat_id).await);
    }

    #[tokio::test]
    async fn test_connections_for_deleted_chat_is_none() {
        // given:
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;
        registry
            .add_connection(chat_id, "alice", frame_sender())
            .await
            .unwrap();

        // when:
        registry.delete_chat(chat_id).await;

        // then: no broadcast target list exists for the deleted chat
        assert!(registry.connections_for(chat_id).await.is_none());
    }

    #[tokio::test]
    async fn test_rename_chat_updates_room() {
        // given:
        let registry = Registry::new();
        let chat_id = registry.create_chat("general").await;

        // when:
        let room = registry.rename_chat(chat_id, "lounge").await.unwrap();

        // then: the room and the chat's copy both carry the new name
        assert_eq!(room.room_name, "lounge");
        assert_eq!(registry.list_rooms().await[0].room_name, "lounge");
        assert_eq!(registry.list_chats().await[0].room.room_name, "lounge");
    }

    #[tokio::test]
    async fn test_rename_unknown_chat() {
        // given:
        let registry = Registry::new();

        // when:
        let result = registry.rename_chat(5, "lounge").await;

        // then:
        assert_eq!(result.unwrap_err(), RegistryError::ChatNotFound(5));
    }

    #[tokio::test]
    async fn test_upsert_user_refreshes_display_name() {
        // given:
        let registry = Registry::new();
        registry.upsert_user("u1", "Alice").await;

        // when: the same user enters again with a new display name
        registry.upsert_user("u1", "Alice B.").await;

        // then: still one entry, with the refreshed name
        let users = registry.list_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_name, "Alice B.");
    }

    #[tokio::test]
    async fn test_handle_send_reaches_receiver() {
        // given:
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.add_connection(chat_id, "alice", tx).await.unwrap();

        // when:
        handle.send("frame".to_string()).unwrap();

        // then:
        assert_eq!(rx.recv().await, Some("frame".to_string()));
    }

    #[tokio::test]
    async fn test_handle_send_after_receiver_dropped() {
        // given:
        let registry = registry_with_user("alice").await;
        let chat_id = registry.create_chat("general").await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = registry.add_connection(chat_id, "alice", tx).await.unwrap();

        // when: the connection's send task is gone
        drop(rx);
        let result = handle.send("frame".to_string());

        // then:
        assert_eq!(result.unwrap_err(), ConnectionClosed(handle.id()));
    }
}
