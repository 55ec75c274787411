//! Error taxonomy for the coordinator.

use crate::registry::{MAX_USERNAME_LENGTH, MIN_USERNAME_LENGTH};
use thiserror::Error;

/// Errors reported to the originating connection.
///
/// None of these are fatal; the server turns them into `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Display name too short or too long after trimming.
    #[error(
        "Username must be between {MIN_USERNAME_LENGTH} and {MAX_USERNAME_LENGTH} characters"
    )]
    InvalidName,

    /// Display name already registered (case-insensitive).
    #[error("Username is already taken")]
    NameTaken,

    /// The event requires a logged-in connection.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Login referenced an unknown user.
    #[error("User not found")]
    UserNotFound,

    /// Message referenced an unknown recipient.
    #[error("Recipient not found")]
    RecipientNotFound,

    /// The connection is already logged in.
    #[error("Already logged in on this connection")]
    AlreadyAuthenticated,

    /// The user is logged in on another connection.
    #[error("User is already online on another connection")]
    AlreadyOnline,

    /// Message body is empty after trimming.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// Message body exceeds the configured length.
    #[error("Message exceeds {0} characters")]
    MessageTooLong(usize),
}

impl CoreError {
    /// Short machine-readable kind, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidName => "invalid_name",
            CoreError::NameTaken => "name_taken",
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::UserNotFound => "user_not_found",
            CoreError::RecipientNotFound => "recipient_not_found",
            CoreError::AlreadyAuthenticated => "already_authenticated",
            CoreError::AlreadyOnline => "already_online",
            CoreError::EmptyMessage => "empty_message",
            CoreError::MessageTooLong(_) => "message_too_long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CoreError::InvalidName.to_string(),
            "Username must be between 2 and 20 characters"
        );
        assert_eq!(CoreError::UserNotFound.to_string(), "User not found");
        assert_eq!(
            CoreError::MessageTooLong(2000).to_string(),
            "Message exceeds 2000 characters"
        );
    }
}
