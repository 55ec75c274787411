//! Presence and routing coordinator.
//!
//! The coordinator owns the registry, the connection bindings and the
//! conversation store. It consumes one event at a time and returns the
//! outbound events it produced as a list of [`Delivery`] values. Fan-out
//! targets are computed from the bindings at the moment of emission.

use crate::binding::{Bindings, ChannelState, ConnectionId};
use crate::conversation::{resolve_limit, ConversationStore, DEFAULT_HISTORY_LIMIT};
use crate::error::CoreError;
use crate::message::compose;
use crate::registry::Registry;
use murmur_protocol::{ChatMessage, ClientEvent, ServerEvent, UserId, UserSummary};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Default maximum message body length, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// History size returned when a request gives no usable limit.
    pub default_history_limit: usize,
    /// Per-conversation retention cap; `None` keeps every message.
    pub max_retained_per_conversation: Option<usize>,
    /// Maximum message body length after trimming.
    pub max_message_length: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_history_limit: DEFAULT_HISTORY_LIMIT,
            max_retained_per_conversation: None,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// An outbound event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Target connection ID.
    pub target: ConnectionId,
    /// The event to deliver.
    pub event: ServerEvent,
}

impl Delivery {
    #[must_use]
    pub fn new(target: ConnectionId, event: ServerEvent) -> Self {
        Self { target, event }
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Number of registered users.
    pub user_count: usize,
    /// Number of users currently online.
    pub online_count: usize,
    /// Number of attached connections.
    pub connection_count: usize,
    /// Number of conversations with stored messages.
    pub conversation_count: usize,
    /// Number of retained messages across all conversations.
    pub message_count: usize,
}

/// The presence and messaging state machine.
#[derive(Debug)]
pub struct Coordinator {
    registry: Registry,
    bindings: Bindings,
    store: ConversationStore,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a new coordinator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Create a new coordinator with custom configuration.
    #[must_use]
    pub fn with_config(config: CoordinatorConfig) -> Self {
        info!("Creating coordinator with config: {:?}", config);
        Self {
            registry: Registry::new(),
            bindings: Bindings::new(),
            store: ConversationStore::with_retention(config.max_retained_per_conversation),
            config,
        }
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidName`] or [`CoreError::NameTaken`].
    pub fn register(&mut self, name: &str) -> Result<UserSummary, CoreError> {
        let user_id = self.registry.register(name)?;
        self.registry
            .get(&user_id)
            .map(|user| user.summary())
            .ok_or(CoreError::UserNotFound)
    }

    /// Attach a newly opened connection in the anonymous state.
    pub fn connect(&mut self, connection_id: ConnectionId) {
        if self.bindings.attach(connection_id.clone()) {
            debug!(connection = %connection_id, "Connection attached");
        } else {
            warn!(connection = %connection_id, "Connection attached twice");
        }
    }

    /// Handle one inbound event from a connection.
    pub fn handle(&mut self, connection_id: &ConnectionId, event: ClientEvent) -> Vec<Delivery> {
        if self.bindings.state(connection_id).is_none() {
            warn!(connection = %connection_id, event = event.name(), "Event from unknown connection");
            return Vec::new();
        }

        let deliveries = match event {
            ClientEvent::Login { user_id } => self.login(connection_id, user_id),
            ClientEvent::GetChatHistory {
                other_user_id,
                limit,
            } => self.chat_history(connection_id, other_user_id, limit),
            ClientEvent::SendMessage {
                recipient_id,
                message,
            } => self.send_message(connection_id, &recipient_id, &message),
            ClientEvent::Typing {
                recipient_id,
                is_typing,
            } => self.typing(connection_id, &recipient_id, is_typing),
            ClientEvent::Logout => self.logout(connection_id),
        };

        debug_assert!(self.is_consistent());
        deliveries
    }

    /// Handle a closed connection.
    ///
    /// The connection is detached before fan-out, so it receives nothing.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Vec<Delivery> {
        let Some(state) = self.bindings.detach(connection_id) else {
            return Vec::new();
        };
        debug!(connection = %connection_id, "Connection detached");

        let deliveries = match state {
            ChannelState::Authenticated(user_id) => self.go_offline(&user_id, None),
            ChannelState::Anonymous => Vec::new(),
        };

        debug_assert!(self.is_consistent());
        deliveries
    }

    fn login(&mut self, connection_id: &ConnectionId, user_id: UserId) -> Vec<Delivery> {
        if self.bindings.resolve(connection_id).is_some() {
            return reject(connection_id, &CoreError::AlreadyAuthenticated);
        }
        let Some(user) = self.registry.get(&user_id) else {
            return reject(connection_id, &CoreError::UserNotFound);
        };
        if user.is_online() {
            return reject(connection_id, &CoreError::AlreadyOnline);
        }
        let summary = user.summary();

        self.bindings.bind(connection_id.clone(), user_id.clone());
        if let Err(e) = self.registry.set_online(&user_id, connection_id.clone()) {
            self.bindings.unbind(connection_id);
            return reject(connection_id, &e);
        }

        info!(connection = %connection_id, user = %user_id, username = %summary.username, "User logged in");

        let mut deliveries = vec![Delivery::new(
            connection_id.clone(),
            ServerEvent::LoginSuccess(summary.clone()),
        )];
        deliveries.extend(self.broadcast(ServerEvent::UsersUpdate(self.registry.list_online(None)), None));
        deliveries.extend(self.broadcast(ServerEvent::UserOnline(summary), Some(connection_id)));
        deliveries
    }

    fn chat_history(
        &self,
        connection_id: &ConnectionId,
        other_user_id: UserId,
        limit: Option<i64>,
    ) -> Vec<Delivery> {
        let Some(user_id) = self.bindings.resolve(connection_id) else {
            debug!(connection = %connection_id, "History request before login ignored");
            return Vec::new();
        };

        let limit = resolve_limit(limit, self.config.default_history_limit);
        let messages = self.store.history(user_id, &other_user_id, limit);
        debug!(user = %user_id, other = %other_user_id, count = messages.len(), "Chat history");

        vec![Delivery::new(
            connection_id.clone(),
            ServerEvent::ChatHistory {
                other_user_id,
                messages,
            },
        )]
    }

    fn send_message(
        &mut self,
        connection_id: &ConnectionId,
        recipient_id: &UserId,
        body: &str,
    ) -> Vec<Delivery> {
        let message = match self.compose_message(connection_id, recipient_id, body) {
            Ok(message) => message,
            Err(e) => return reject(connection_id, &e),
        };

        let recipient_connection = self
            .registry
            .get(recipient_id)
            .and_then(|user| user.connection())
            .cloned();

        debug!(
            message = %message.id,
            sender = %message.sender_id,
            recipient = %message.recipient_id,
            delivered = recipient_connection.is_some(),
            "Message stored"
        );

        let sender_id = message.sender_id.clone();
        let stored = self.store.append(&sender_id, recipient_id, message).clone();

        let mut deliveries = Vec::with_capacity(2);
        if let Some(target) = recipient_connection {
            deliveries.push(Delivery::new(target, ServerEvent::ReceiveMessage(stored.clone())));
        }
        deliveries.push(Delivery::new(connection_id.clone(), ServerEvent::MessageSent(stored)));
        deliveries
    }

    /// Validate a send and build the message. Nothing is mutated.
    fn compose_message(
        &self,
        connection_id: &ConnectionId,
        recipient_id: &UserId,
        body: &str,
    ) -> Result<ChatMessage, CoreError> {
        let sender = self
            .bindings
            .resolve(connection_id)
            .and_then(|id| self.registry.get(id))
            .ok_or(CoreError::Unauthenticated)?;
        let recipient = self
            .registry
            .get(recipient_id)
            .ok_or(CoreError::RecipientNotFound)?;

        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::EmptyMessage);
        }
        if body.chars().count() > self.config.max_message_length {
            return Err(CoreError::MessageTooLong(self.config.max_message_length));
        }

        Ok(compose(sender, recipient, body))
    }

    fn typing(
        &self,
        connection_id: &ConnectionId,
        recipient_id: &UserId,
        is_typing: bool,
    ) -> Vec<Delivery> {
        let Some(user_id) = self.bindings.resolve(connection_id) else {
            return Vec::new();
        };

        match self.registry.get(recipient_id).and_then(|user| user.connection()) {
            Some(target) => vec![Delivery::new(
                target.clone(),
                ServerEvent::UserTyping {
                    user_id: user_id.clone(),
                    is_typing,
                },
            )],
            None => Vec::new(),
        }
    }

    fn logout(&mut self, connection_id: &ConnectionId) -> Vec<Delivery> {
        let Some(user_id) = self.bindings.unbind(connection_id) else {
            debug!(connection = %connection_id, "Logout before login ignored");
            return Vec::new();
        };
        self.go_offline(&user_id, Some(connection_id))
    }

    /// Mark a user offline and announce it. The binding is already gone.
    fn go_offline(&mut self, user_id: &UserId, exclude: Option<&ConnectionId>) -> Vec<Delivery> {
        self.registry.set_offline(user_id);
        let Some(summary) = self.registry.get(user_id).map(|user| user.summary()) else {
            return Vec::new();
        };

        info!(user = %user_id, username = %summary.username, "User went offline");

        let mut deliveries = self.broadcast(ServerEvent::UserOffline(summary), exclude);
        deliveries.extend(self.broadcast(ServerEvent::UsersUpdate(self.registry.list_online(None)), None));
        deliveries
    }

    /// Address `event` to every attached connection except `exclude`.
    fn broadcast(&self, event: ServerEvent, exclude: Option<&ConnectionId>) -> Vec<Delivery> {
        self.bindings
            .handles()
            .filter(|&conn| Some(conn) != exclude)
            .map(|conn| Delivery::new(conn.clone(), event.clone()))
            .collect()
    }

    /// Check that presence and bindings agree.
    ///
    /// Every online user is bound on exactly the connection it holds, and
    /// every binding points at a user that is online on that connection.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let mut bound_users = HashSet::with_capacity(self.bindings.len());
        for (conn, user_id) in self.bindings.bound() {
            let holds = self
                .registry
                .get(user_id)
                .and_then(|user| user.connection())
                == Some(conn);
            if !holds || !bound_users.insert(user_id) {
                return false;
            }
        }

        self.registry
            .iter()
            .all(|user| user.is_online() == bound_users.contains(user.id()))
    }

    /// Get the state of a connection.
    #[must_use]
    pub fn channel_state(&self, connection_id: &ConnectionId) -> Option<&ChannelState> {
        self.bindings.state(connection_id)
    }

    /// Read-only access to the registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Read-only access to the conversation store.
    #[must_use]
    pub fn conversations(&self) -> &ConversationStore {
        &self.store
    }

    /// Snapshot of online users in registration order.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserSummary> {
        self.registry.list_online(None)
    }

    /// Get coordinator statistics.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            user_count: self.registry.len(),
            online_count: self.registry.online_count(),
            connection_count: self.bindings.len(),
            conversation_count: self.store.conversation_count(),
            message_count: self.store.message_count(),
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn reject(connection_id: &ConnectionId, error: &CoreError) -> Vec<Delivery> {
    debug!(connection = %connection_id, error = %error, "Event rejected");
    vec![Delivery::new(
        connection_id.clone(),
        ServerEvent::error(error.to_string()),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    fn login(user_id: &UserId) -> ClientEvent {
        ClientEvent::Login {
            user_id: user_id.clone(),
        }
    }

    fn send(recipient: &UserId, body: &str) -> ClientEvent {
        ClientEvent::SendMessage {
            recipient_id: recipient.clone(),
            message: body.to_string(),
        }
    }

    fn history(other: &UserId) -> ClientEvent {
        ClientEvent::GetChatHistory {
            other_user_id: other.clone(),
            limit: None,
        }
    }

    fn to<'a>(deliveries: &'a [Delivery], target: &str) -> Vec<&'a ServerEvent> {
        deliveries
            .iter()
            .filter(|d| d.target.as_str() == target)
            .map(|d| &d.event)
            .collect()
    }

    /// Two registered users, both logged in on `conn-a` / `conn-b`.
    fn pair() -> (Coordinator, UserId, UserId) {
        let mut coordinator = Coordinator::new();
        let a = coordinator.register("alice").unwrap().user_id;
        let b = coordinator.register("bob").unwrap().user_id;
        coordinator.connect(conn("conn-a"));
        coordinator.connect(conn("conn-b"));
        coordinator.handle(&conn("conn-a"), login(&a));
        coordinator.handle(&conn("conn-b"), login(&b));
        (coordinator, a, b)
    }

    #[test]
    fn test_register_errors() {
        let mut coordinator = Coordinator::new();
        coordinator.register("alice").unwrap();

        assert_eq!(coordinator.register("ALICE"), Err(CoreError::NameTaken));
        assert_eq!(coordinator.register("x"), Err(CoreError::InvalidName));
        assert_eq!(coordinator.stats().user_count, 1);
    }

    #[test]
    fn test_login_fan_out() {
        let mut coordinator = Coordinator::new();
        let a = coordinator.register("alice").unwrap().user_id;
        coordinator.connect(conn("conn-a"));
        coordinator.connect(conn("conn-x"));

        let deliveries = coordinator.handle(&conn("conn-a"), login(&a));
        let roster = vec![UserSummary::new(a.clone(), "alice")];

        assert_eq!(
            to(&deliveries, "conn-a"),
            vec![
                &ServerEvent::LoginSuccess(UserSummary::new(a.clone(), "alice")),
                &ServerEvent::UsersUpdate(roster.clone()),
            ]
        );
        assert_eq!(
            to(&deliveries, "conn-x"),
            vec![
                &ServerEvent::UsersUpdate(roster),
                &ServerEvent::UserOnline(UserSummary::new(a.clone(), "alice")),
            ]
        );
        assert_eq!(
            coordinator.channel_state(&conn("conn-a")),
            Some(&ChannelState::Authenticated(a))
        );
    }

    #[test]
    fn test_login_unknown_user() {
        let mut coordinator = Coordinator::new();
        coordinator.connect(conn("conn-a"));
        coordinator.connect(conn("conn-x"));

        let deliveries = coordinator.handle(&conn("conn-a"), login(&UserId::from("ghost")));

        assert_eq!(
            deliveries,
            vec![Delivery::new(conn("conn-a"), ServerEvent::error("User not found"))]
        );
        assert_eq!(
            coordinator.channel_state(&conn("conn-a")),
            Some(&ChannelState::Anonymous)
        );
    }

    #[test]
    fn test_second_login_rejected() {
        let (mut coordinator, a, b) = pair();
        coordinator.connect(conn("conn-c"));

        let deliveries = coordinator.handle(&conn("conn-c"), login(&a));
        assert_eq!(
            deliveries,
            vec![Delivery::new(
                conn("conn-c"),
                ServerEvent::error(CoreError::AlreadyOnline.to_string())
            )]
        );

        let deliveries = coordinator.handle(&conn("conn-a"), login(&b));
        assert_eq!(
            deliveries,
            vec![Delivery::new(
                conn("conn-a"),
                ServerEvent::error(CoreError::AlreadyAuthenticated.to_string())
            )]
        );

        let user = coordinator.registry().get(&a).unwrap();
        assert_eq!(user.connection(), Some(&conn("conn-a")));
        assert!(coordinator.is_consistent());
    }

    #[test]
    fn test_end_to_end_message() {
        let (mut coordinator, a, b) = pair();

        let deliveries = coordinator.handle(&conn("conn-a"), send(&b, "hi"));

        let received = match to(&deliveries, "conn-b").as_slice() {
            [ServerEvent::ReceiveMessage(m)] => m.clone(),
            other => panic!("Expected receive-message, got {:?}", other),
        };
        assert_eq!(received.message, "hi");
        assert_eq!(received.sender_id, a);
        assert_eq!(received.sender_name, "alice");
        assert_eq!(received.recipient_name, "bob");

        let sent = match to(&deliveries, "conn-a").as_slice() {
            [ServerEvent::MessageSent(m)] => m.clone(),
            other => panic!("Expected message-sent, got {:?}", other),
        };
        assert_eq!(sent.id, received.id);

        let deliveries = coordinator.handle(&conn("conn-a"), history(&b));
        assert_eq!(
            deliveries,
            vec![Delivery::new(
                conn("conn-a"),
                ServerEvent::ChatHistory {
                    other_user_id: b.clone(),
                    messages: vec![sent],
                }
            )]
        );
    }

    #[test]
    fn test_message_body_is_trimmed() {
        let (mut coordinator, a, b) = pair();
        coordinator.handle(&conn("conn-a"), send(&b, "  hello  "));

        let stored = coordinator.conversations().history(&a, &b, 10);
        assert_eq!(stored[0].message, "hello");
    }

    #[test]
    fn test_message_to_offline_recipient() {
        let (mut coordinator, a, b) = pair();
        coordinator.handle(&conn("conn-b"), ClientEvent::Logout);

        let deliveries = coordinator.handle(&conn("conn-a"), send(&b, "later"));

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].target, conn("conn-a"));
        assert!(matches!(deliveries[0].event, ServerEvent::MessageSent(_)));
        assert!(!deliveries
            .iter()
            .any(|d| matches!(d.event, ServerEvent::ReceiveMessage(_))));

        let stored = coordinator.conversations().history(&a, &b, 50);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "later");
    }

    #[test]
    fn test_message_to_unknown_recipient() {
        let (mut coordinator, a, _) = pair();
        let ghost = UserId::from("ghost");
        let before = coordinator.stats().message_count;

        let deliveries = coordinator.handle(&conn("conn-a"), send(&ghost, "hello?"));

        assert_eq!(
            deliveries,
            vec![Delivery::new(conn("conn-a"), ServerEvent::error("Recipient not found"))]
        );
        assert_eq!(coordinator.stats().message_count, before);
        assert_eq!(coordinator.conversations().len_between(&a, &ghost), 0);
    }

    #[test]
    fn test_message_before_login() {
        let (mut coordinator, _, b) = pair();
        coordinator.connect(conn("conn-z"));

        let deliveries = coordinator.handle(&conn("conn-z"), send(&b, "hi"));

        assert_eq!(
            deliveries,
            vec![Delivery::new(conn("conn-z"), ServerEvent::error("Not authenticated"))]
        );
        assert_eq!(coordinator.stats().message_count, 0);
    }

    #[test]
    fn test_empty_and_oversized_messages_rejected() {
        let mut coordinator = Coordinator::with_config(CoordinatorConfig {
            max_message_length: 5,
            ..CoordinatorConfig::default()
        });
        let a = coordinator.register("alice").unwrap().user_id;
        let b = coordinator.register("bob").unwrap().user_id;
        coordinator.connect(conn("conn-a"));
        coordinator.handle(&conn("conn-a"), login(&a));

        let deliveries = coordinator.handle(&conn("conn-a"), send(&b, "   "));
        assert_eq!(
            deliveries,
            vec![Delivery::new(conn("conn-a"), ServerEvent::error("Message cannot be empty"))]
        );

        let deliveries = coordinator.handle(&conn("conn-a"), send(&b, "toolong"));
        assert_eq!(
            deliveries,
            vec![Delivery::new(
                conn("conn-a"),
                ServerEvent::error("Message exceeds 5 characters")
            )]
        );

        assert!(coordinator.handle(&conn("conn-a"), send(&b, " five ")).len() == 1);
        assert_eq!(coordinator.conversations().len_between(&a, &b), 1);
    }

    #[test]
    fn test_history_ignored_before_login() {
        let (mut coordinator, a, b) = pair();
        coordinator.handle(&conn("conn-a"), send(&b, "hi"));
        coordinator.connect(conn("conn-z"));

        assert!(coordinator.handle(&conn("conn-z"), history(&a)).is_empty());
    }

    #[test]
    fn test_history_unknown_peer_is_empty() {
        let (mut coordinator, _, _) = pair();
        let deliveries = coordinator.handle(&conn("conn-a"), history(&UserId::from("ghost")));

        assert_eq!(
            deliveries,
            vec![Delivery::new(
                conn("conn-a"),
                ServerEvent::ChatHistory {
                    other_user_id: UserId::from("ghost"),
                    messages: Vec::new(),
                }
            )]
        );
    }

    #[test]
    fn test_history_limit() {
        let (mut coordinator, _, b) = pair();
        for i in 0..5 {
            coordinator.handle(&conn("conn-a"), send(&b, &format!("m{i}")));
        }

        let deliveries = coordinator.handle(
            &conn("conn-a"),
            ClientEvent::GetChatHistory {
                other_user_id: b.clone(),
                limit: Some(2),
            },
        );
        let ServerEvent::ChatHistory { messages, .. } = &deliveries[0].event else {
            panic!("Expected chat-history");
        };
        let bodies: Vec<_> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);
    }

    #[test]
    fn test_history_symmetric() {
        let (mut coordinator, a, b) = pair();
        coordinator.handle(&conn("conn-a"), send(&b, "one"));
        coordinator.handle(&conn("conn-b"), send(&a, "two"));

        let from_a = coordinator.handle(&conn("conn-a"), history(&b));
        let from_b = coordinator.handle(&conn("conn-b"), history(&a));
        let (
            ServerEvent::ChatHistory { messages: ma, .. },
            ServerEvent::ChatHistory { messages: mb, .. },
        ) = (&from_a[0].event, &from_b[0].event)
        else {
            panic!("Expected chat-history");
        };
        assert_eq!(ma, mb);
        assert_eq!(ma.len(), 2);
    }

    #[test]
    fn test_typing_is_unicast_and_not_stored() {
        let (mut coordinator, a, b) = pair();

        for is_typing in [true, false, true] {
            let deliveries = coordinator.handle(
                &conn("conn-a"),
                ClientEvent::Typing {
                    recipient_id: b.clone(),
                    is_typing,
                },
            );
            assert_eq!(
                deliveries,
                vec![Delivery::new(
                    conn("conn-b"),
                    ServerEvent::UserTyping {
                        user_id: a.clone(),
                        is_typing,
                    }
                )]
            );
        }

        assert!(coordinator.conversations().history(&a, &b, 50).is_empty());
        assert_eq!(coordinator.stats().conversation_count, 0);
    }

    #[test]
    fn test_typing_to_offline_or_anonymous() {
        let (mut coordinator, a, b) = pair();
        coordinator.handle(&conn("conn-b"), ClientEvent::Logout);
        let typing = ClientEvent::Typing {
            recipient_id: b.clone(),
            is_typing: true,
        };
        assert!(coordinator.handle(&conn("conn-a"), typing).is_empty());

        coordinator.connect(conn("conn-z"));
        let typing = ClientEvent::Typing {
            recipient_id: a,
            is_typing: true,
        };
        assert!(coordinator.handle(&conn("conn-z"), typing).is_empty());
    }

    #[test]
    fn test_logout_fan_out() {
        let (mut coordinator, a, b) = pair();

        let deliveries = coordinator.handle(&conn("conn-b"), ClientEvent::Logout);

        let roster = vec![UserSummary::new(a.clone(), "alice")];
        assert_eq!(
            to(&deliveries, "conn-a"),
            vec![
                &ServerEvent::UserOffline(UserSummary::new(b.clone(), "bob")),
                &ServerEvent::UsersUpdate(roster.clone()),
            ]
        );
        assert_eq!(to(&deliveries, "conn-b"), vec![&ServerEvent::UsersUpdate(roster)]);
        assert_eq!(
            coordinator.channel_state(&conn("conn-b")),
            Some(&ChannelState::Anonymous)
        );
        assert!(!coordinator.registry().get(&b).unwrap().is_online());
    }

    #[test]
    fn test_logout_then_login_again() {
        let (mut coordinator, _, b) = pair();
        coordinator.handle(&conn("conn-b"), ClientEvent::Logout);

        let deliveries = coordinator.handle(&conn("conn-b"), login(&b));
        assert!(matches!(
            to(&deliveries, "conn-b")[0],
            ServerEvent::LoginSuccess(_)
        ));
        assert!(coordinator.registry().get(&b).unwrap().is_online());
    }

    #[test]
    fn test_disconnect_fan_out() {
        let (mut coordinator, a, b) = pair();

        let deliveries = coordinator.disconnect(&conn("conn-b"));

        assert!(to(&deliveries, "conn-b").is_empty());
        assert_eq!(
            to(&deliveries, "conn-a"),
            vec![
                &ServerEvent::UserOffline(UserSummary::new(b.clone(), "bob")),
                &ServerEvent::UsersUpdate(vec![UserSummary::new(a, "alice")]),
            ]
        );
        assert!(coordinator.channel_state(&conn("conn-b")).is_none());
        assert_eq!(coordinator.stats().connection_count, 1);
    }

    #[test]
    fn test_anonymous_disconnect_and_logout_are_silent() {
        let mut coordinator = Coordinator::new();
        coordinator.connect(conn("conn-a"));
        coordinator.connect(conn("conn-b"));

        assert!(coordinator.handle(&conn("conn-a"), ClientEvent::Logout).is_empty());
        assert!(coordinator.disconnect(&conn("conn-a")).is_empty());
        assert!(coordinator.disconnect(&conn("conn-a")).is_empty());
    }

    #[test]
    fn test_events_from_unattached_connection_dropped() {
        let (mut coordinator, a, _) = pair();
        assert!(coordinator.handle(&conn("conn-?"), login(&a)).is_empty());
    }

    #[test]
    fn test_presence_stays_consistent() {
        fn check(coordinator: &Coordinator) {
            assert!(coordinator.is_consistent());
            for user in coordinator.registry().iter() {
                assert_eq!(user.is_online(), user.connection().is_some());
            }
        }

        let mut coordinator = Coordinator::new();
        let a = coordinator.register("alice").unwrap().user_id;
        let b = coordinator.register("bob").unwrap().user_id;

        coordinator.connect(conn("conn-1"));
        coordinator.connect(conn("conn-2"));
        check(&coordinator);
        coordinator.handle(&conn("conn-1"), login(&a));
        check(&coordinator);
        coordinator.handle(&conn("conn-2"), login(&a));
        check(&coordinator);
        coordinator.handle(&conn("conn-1"), ClientEvent::Logout);
        check(&coordinator);
        coordinator.handle(&conn("conn-1"), login(&b));
        check(&coordinator);
        coordinator.handle(&conn("conn-2"), login(&a));
        check(&coordinator);
        coordinator.handle(&conn("conn-2"), ClientEvent::Logout);
        check(&coordinator);
        coordinator.disconnect(&conn("conn-1"));
        check(&coordinator);
        coordinator.disconnect(&conn("conn-2"));
        check(&coordinator);

        assert_eq!(coordinator.stats().online_count, 0);
        assert_eq!(coordinator.stats().connection_count, 0);
    }

    #[test]
    fn test_consistency_detects_broken_presence() {
        let (mut coordinator, a, b) = pair();
        assert!(coordinator.is_consistent());

        // Binding without matching presence.
        coordinator.connect(conn("conn-c"));
        coordinator.bindings.bind(conn("conn-c"), a.clone());
        assert!(!coordinator.is_consistent());
        coordinator.bindings.unbind(&conn("conn-c"));
        assert!(coordinator.is_consistent());

        // Presence without a binding.
        coordinator.bindings.unbind(&conn("conn-b"));
        assert!(!coordinator.is_consistent());
        coordinator.registry.set_offline(&b);
        assert!(coordinator.is_consistent());
    }

    #[test]
    fn test_consistency_with_many_sessions() {
        let mut coordinator = Coordinator::new();
        let mut sessions = Vec::new();
        for n in 0..200 {
            let user_id = coordinator.register(&format!("user{n}")).unwrap().user_id;
            let connection_id = conn(&format!("conn-{n}"));
            coordinator.connect(connection_id.clone());
            if n % 2 == 0 {
                coordinator.handle(&connection_id, login(&user_id));
            }
            sessions.push(connection_id);
        }
        assert!(coordinator.is_consistent());
        assert_eq!(coordinator.stats().online_count, 100);

        for connection_id in sessions.iter().step_by(4) {
            coordinator.disconnect(connection_id);
        }
        assert!(coordinator.is_consistent());
        assert_eq!(coordinator.stats().online_count, 50);
    }
}
