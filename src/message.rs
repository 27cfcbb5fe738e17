//! Wire types shared by the durable queue and the WebSocket surface.

use serde::{Deserialize, Serialize};

/// Frame-type tag for text messages, carried in queue records.
pub const TEXT_MESSAGE: i32 = 1;

/// Record published to the durable queue for one inbound client frame.
///
/// Immutable once published: the author is resolved from the sending
/// connection's owning user, the chat id from its owning chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub msg: String,
    pub author: String,
    #[serde(rename = "messageType")]
    pub message_type: i32,
    #[serde(rename = "chatId")]
    pub chat_id: u64,
}

/// Frame pushed to connected clients for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub msg: String,
    pub author: String,
}

impl DisplayMessage {
    /// Display form of a queued record.
    pub fn from_queued(message: &QueueMessage) -> Self {
        Self {
            msg: message.msg.clone(),
            author: message.author.clone(),
        }
    }
}
