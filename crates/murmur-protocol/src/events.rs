//! Event types for the murmur protocol.
//!
//! Inbound events ([`ClientEvent`]) are produced by clients; outbound
//! events ([`ServerEvent`]) are produced by the server. Both are
//! adjacently tagged so the wire shape is `{"event": name, "data": payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique message identifier.
pub type MessageId = String;

/// Durable user identifier handed out at registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user ID from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Public view of a user as shown on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
}

impl UserSummary {
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// A direct message between two users.
///
/// Display names are snapshots taken when the message was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub recipient_id: UserId,
    pub recipient_name: String,
    /// Trimmed message body.
    pub message: String,
    /// Send time, serialized as an ISO-8601 instant.
    pub timestamp: DateTime<Utc>,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind this connection to a registered user.
    #[serde(rename_all = "camelCase")]
    Login { user_id: UserId },

    /// Fetch the conversation with another user.
    #[serde(rename_all = "camelCase")]
    GetChatHistory {
        other_user_id: UserId,
        /// Maximum number of messages; non-positive or absent means the default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
    },

    /// Send a direct message.
    #[serde(rename_all = "camelCase")]
    SendMessage { recipient_id: UserId, message: String },

    /// Typing indicator for a single recipient.
    #[serde(rename_all = "camelCase")]
    Typing { recipient_id: UserId, is_typing: bool },

    /// Unbind this connection without closing it.
    Logout,
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Login { .. } => "login",
            ClientEvent::GetChatHistory { .. } => "get-chat-history",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::Logout => "logout",
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Login accepted for the requesting connection.
    LoginSuccess(UserSummary),

    /// Full roster of online users.
    UsersUpdate(Vec<UserSummary>),

    /// A user came online.
    UserOnline(UserSummary),

    /// A user went offline.
    UserOffline(UserSummary),

    /// Conversation history with another user, oldest first.
    #[serde(rename_all = "camelCase")]
    ChatHistory {
        other_user_id: UserId,
        messages: Vec<ChatMessage>,
    },

    /// A message addressed to this connection's user.
    ReceiveMessage(ChatMessage),

    /// Confirmation that a message was stored.
    MessageSent(ChatMessage),

    /// Typing indicator from a peer.
    #[serde(rename_all = "camelCase")]
    UserTyping { user_id: UserId, is_typing: bool },

    /// Non-fatal error reported to the originating connection.
    Error { message: String },
}

impl ServerEvent {
    /// Create a new Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::LoginSuccess(_) => "login-success",
            ServerEvent::UsersUpdate(_) => "users-update",
            ServerEvent::UserOnline(_) => "user-online",
            ServerEvent::UserOffline(_) => "user-offline",
            ServerEvent::ChatHistory { .. } => "chat-history",
            ServerEvent::ReceiveMessage(_) => "receive-message",
            ServerEvent::MessageSent(_) => "message-sent",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::Error { .. } => "error",
        }
    }
}
