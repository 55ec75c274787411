//! Identity registry.
//!
//! Users are appended at registration and never removed. A user is online
//! exactly when it holds a connection handle.

use crate::binding::ConnectionId;
use crate::error::CoreError;
use murmur_protocol::{UserId, UserSummary};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

/// Minimum display name length, in characters.
pub const MIN_USERNAME_LENGTH: usize = 2;

/// Maximum display name length, in characters.
pub const MAX_USERNAME_LENGTH: usize = 20;

/// Validate a display name, returning its trimmed form.
///
/// # Errors
///
/// Returns [`CoreError::InvalidName`] if the trimmed name has fewer than
/// [`MIN_USERNAME_LENGTH`] or more than [`MAX_USERNAME_LENGTH`] characters.
pub fn validate_username(name: &str) -> Result<&str, CoreError> {
    let trimmed = name.trim();
    let length = trimmed.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&length) {
        return Err(CoreError::InvalidName);
    }
    Ok(trimmed)
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    username: String,
    connection: Option<ConnectionId>,
}

impl User {
    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The connection this user is logged in on.
    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionId> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary::new(self.id.clone(), self.username.clone())
    }
}

/// Append-only store of registered users, kept in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    users: Vec<User>,
    index: HashMap<UserId, usize>,
    /// Lowercased display names, for case-insensitive uniqueness.
    names: HashSet<String>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new user and return its fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] or [`CoreError::NameTaken`]. The
    /// registry is unchanged on error.
    pub fn register(&mut self, name: &str) -> Result<UserId, CoreError> {
        let username = validate_username(name)?;
        let folded = username.to_lowercase();
        if self.names.contains(&folded) {
            debug!(username = %username, "Registration rejected: name taken");
            return Err(CoreError::NameTaken);
        }

        let id = UserId::new(Uuid::new_v4().to_string());
        self.names.insert(folded);
        self.index.insert(id.clone(), self.users.len());
        self.users.push(User {
            id: id.clone(),
            username: username.to_string(),
            connection: None,
        });

        info!(user = %id, username = %username, "User registered");
        Ok(id)
    }

    #[must_use]
    pub fn exists(&self, user_id: &UserId) -> bool {
        self.index.contains_key(user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&User> {
        self.index.get(user_id).map(|&i| &self.users[i])
    }

    /// Mark a user online on the given connection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UserNotFound`] if the user is unknown.
    pub fn set_online(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Result<(), CoreError> {
        let &i = self.index.get(user_id).ok_or(CoreError::UserNotFound)?;
        self.users[i].connection = Some(connection_id);
        Ok(())
    }

    /// Mark a user offline, returning the connection it held.
    ///
    /// No-op for unknown users.
    pub fn set_offline(&mut self, user_id: &UserId) -> Option<ConnectionId> {
        let &i = self.index.get(user_id)?;
        self.users[i].connection.take()
    }

    /// Snapshot of online users in registration order.
    #[must_use]
    pub fn list_online(&self, excluding: Option<&UserId>) -> Vec<UserSummary> {
        self.users
            .iter()
            .filter(|user| user.is_online() && Some(&user.id) != excluding)
            .map(User::summary)
            .collect()
    }

    /// Iterate over all users in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.users.iter().filter(|user| user.is_online()).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
