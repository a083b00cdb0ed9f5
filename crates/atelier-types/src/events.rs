use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Role};

/// Commands sent FROM client TO server over the gateway socket.
///
/// Wire names match the storefront client vocabulary (`message:send`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Send a chat message to another user
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
        content: String,
    },

    /// Indicate the caller started typing to a user
    #[serde(rename = "typing:start")]
    TypingStart {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
    },

    /// Indicate the caller stopped typing
    #[serde(rename = "typing:stop")]
    TypingStop {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
    },

    /// Mark the caller's unread messages in a conversation as read
    #[serde(rename = "messages:read")]
    MessagesRead {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

/// Events sent FROM server TO client over the gateway socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready {
        #[serde(rename = "userId")]
        user_id: Uuid,
        name: String,
        role: Role,
    },

    /// A new message was persisted, delivered to both participant rooms
    #[serde(rename = "message:new")]
    MessageNew(ChatMessage),

    /// Lightweight badge hint for the receiver, sent only when a presence
    /// entry exists. Losing it is harmless: the message itself already went
    /// to the receiver's room.
    #[serde(rename = "message:notification")]
    MessageNotification {
        from: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// Operation failed; delivered only to the connection that caused it
    #[serde(rename = "message:error")]
    MessageError { message: String },

    /// Relayed typing indicator
    #[serde(rename = "typing:status")]
    TypingStatus {
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "userName")]
        user_name: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// The other participant read their side of a conversation
    #[serde(rename = "messages:read")]
    MessagesRead {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    /// A user came online or went offline, broadcast to every connection
    #[serde(rename = "user:status")]
    UserStatus {
        #[serde(rename = "userId")]
        user_id: Uuid,
        #[serde(rename = "isOnline")]
        is_online: bool,
    },
}
