//! Message construction.

use crate::registry::User;
use chrono::Utc;
use murmur_protocol::{ChatMessage, MessageId};
use uuid::Uuid;

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    Uuid::new_v4().to_string()
}

/// Build a message from `sender` to `recipient`.
///
/// Both display names are copied into the message. The body is stored
/// as given; callers trim and validate it first.
#[must_use]
pub fn compose(sender: &User, recipient: &User, body: impl Into<String>) -> ChatMessage {
    ChatMessage {
        id: generate_message_id(),
        sender_id: sender.id().clone(),
        sender_name: sender.username().to_string(),
        recipient_id: recipient.id().clone(),
        recipient_name: recipient.username().to_string(),
        message: body.into(),
        timestamp: Utc::now(),
    }
}
