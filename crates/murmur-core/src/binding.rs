//! Connection binding.
//!
//! Every open connection is attached here in the [`ChannelState::Anonymous`]
//! state and moves to [`ChannelState::Authenticated`] after a successful login.

use murmur_protocol::UserId;
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Authentication state of a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected, not logged in.
    Anonymous,
    /// Logged in as the given user.
    Authenticated(UserId),
}

impl ChannelState {
    /// The bound user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        match self {
            ChannelState::Anonymous => None,
            ChannelState::Authenticated(user_id) => Some(user_id),
        }
    }
}

/// Lookup table from connection to its state.
///
/// Ordered by connection ID so fan-out order is deterministic.
#[derive(Debug, Default)]
pub struct Bindings {
    channels: BTreeMap<ConnectionId, ChannelState>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a newly opened connection as anonymous.
    ///
    /// Returns `false` if the connection was already attached.
    pub fn attach(&mut self, connection_id: ConnectionId) -> bool {
        if self.channels.contains_key(&connection_id) {
            return false;
        }
        trace!(connection = %connection_id, "Channel attached");
        self.channels.insert(connection_id, ChannelState::Anonymous);
        true
    }

    /// Remove a closed connection, returning its last state.
    pub fn detach(&mut self, connection_id: &ConnectionId) -> Option<ChannelState> {
        self.channels.remove(connection_id)
    }

    /// Bind a connection to a user, overwriting any prior binding.
    pub fn bind(&mut self, connection_id: ConnectionId, user_id: UserId) {
        trace!(connection = %connection_id, user = %user_id, "Channel bound");
        self.channels
            .insert(connection_id, ChannelState::Authenticated(user_id));
    }

    /// Resolve the user bound to a connection.
    #[must_use]
    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<&UserId> {
        self.channels.get(connection_id).and_then(ChannelState::user)
    }

    /// Drop a connection's binding, leaving it attached as anonymous.
    ///
    /// Returns the previously bound user. No-op if there was none.
    pub fn unbind(&mut self, connection_id: &ConnectionId) -> Option<UserId> {
        let state = self.channels.get_mut(connection_id)?;
        match std::mem::replace(state, ChannelState::Anonymous) {
            ChannelState::Authenticated(user_id) => Some(user_id),
            ChannelState::Anonymous => None,
        }
    }

    /// Get the state of a connection.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> Option<&ChannelState> {
        self.channels.get(connection_id)
    }

    /// All attached connections, in ID order.
    pub fn handles(&self) -> impl Iterator<Item = &ConnectionId> {
        self.channels.keys()
    }

    /// All authenticated `(connection, user)` pairs.
    pub fn bound(&self) -> impl Iterator<Item = (&ConnectionId, &UserId)> {
        self.channels
            .iter()
            .filter_map(|(conn, state)| state.user().map(|user| (conn, user)))
    }

    /// Number of attached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
