//! Conversation store.
//!
//! Each unordered pair of users owns one append-only, chronologically
//! ordered message log.

use murmur_protocol::{ChatMessage, UserId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::trace;

/// Number of messages returned by a history read when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Resolve a requested history limit.
///
/// Missing, zero or negative requests fall back to `default`.
#[must_use]
pub fn resolve_limit(requested: Option<i64>, default: usize) -> usize {
    match requested {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
        _ => default,
    }
}

/// Canonical key for a conversation between two users.
///
/// Both orderings of a pair produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    #[must_use]
    pub fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self {
                low: a.clone(),
                high: b.clone(),
            }
        } else {
            Self {
                low: b.clone(),
                high: a.clone(),
            }
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.low, self.high)
    }
}

/// In-memory message history for all conversations.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationKey, VecDeque<ChatMessage>>,
    /// Per-conversation retention cap; `None` keeps everything.
    max_retained: Option<usize>,
    message_count: usize,
}

impl ConversationStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_retained` messages per conversation.
    #[must_use]
    pub fn with_retention(max_retained: Option<usize>) -> Self {
        Self {
            max_retained: max_retained.filter(|&n| n > 0),
            ..Self::default()
        }
    }

    /// Append a message to the conversation between `a` and `b`.
    ///
    /// A timestamp earlier than the conversation's last message is raised
    /// to it, keeping each log non-decreasing in time. Returns the stored
    /// message.
    pub fn append(&mut self, a: &UserId, b: &UserId, mut message: ChatMessage) -> &ChatMessage {
        let key = ConversationKey::new(a, b);
        let log = self.conversations.entry(key).or_default();

        if let Some(last) = log.back() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }

        trace!(message = %message.id, "Appending message");
        log.push_back(message);
        self.message_count += 1;

        if let Some(cap) = self.max_retained {
            while log.len() > cap {
                log.pop_front();
                self.message_count -= 1;
            }
        }

        &log[log.len() - 1]
    }

    /// The last `limit` messages between `a` and `b`, oldest first.
    ///
    /// A `limit` of zero means [`DEFAULT_HISTORY_LIMIT`]. Returns an empty
    /// vector if the pair never exchanged messages.
    #[must_use]
    pub fn history(&self, a: &UserId, b: &UserId, limit: usize) -> Vec<ChatMessage> {
        let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        let Some(log) = self.conversations.get(&ConversationKey::new(a, b)) else {
            return Vec::new();
        };
        log.iter()
            .skip(log.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    /// Number of messages stored between `a` and `b`.
    #[must_use]
    pub fn len_between(&self, a: &UserId, b: &UserId) -> usize {
        self.conversations
            .get(&ConversationKey::new(a, b))
            .map_or(0, VecDeque::len)
    }

    /// Number of conversations with at least one message.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Total number of retained messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.message_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn message(from: &str, to: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: format!("{from}-{body}"),
            sender_id: UserId::from(from),
            sender_name: from.to_string(),
            recipient_id: UserId::from(to),
            recipient_name: to.to_string(),
            message: body.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = UserId::from("a");
        let b = UserId::from("b");
        assert_eq!(ConversationKey::new(&a, &b), ConversationKey::new(&b, &a));
        assert_eq!(ConversationKey::new(&b, &a).to_string(), "a_b");
    }

    #[test]
    fn test_history_same_for_both_orderings() {
        let mut store = ConversationStore::new();
        let a = UserId::from("a");
        let b = UserId::from("b");

        store.append(&a, &b, message("a", "b", "one"));
        store.append(&b, &a, message("b", "a", "two"));

        let ab = store.history(&a, &b, 50);
        let ba = store.history(&b, &a, 50);
        assert_eq!(ab, ba);
        let bodies: Vec<_> = ab.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
        assert_eq!(store.conversation_count(), 1);
    }

    #[test]
    fn test_history_empty_pair() {
        let store = ConversationStore::new();
        assert!(store
            .history(&UserId::from("a"), &UserId::from("b"), 10)
            .is_empty());
    }

    #[test]
    fn test_history_returns_latest_in_order() {
        let mut store = ConversationStore::new();
        let a = UserId::from("a");
        let b = UserId::from("b");
        for i in 0..60 {
            store.append(&a, &b, message("a", "b", &i.to_string()));
        }

        let last = store.history(&a, &b, 3);
        let bodies: Vec<_> = last.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["57", "58", "59"]);

        assert_eq!(store.history(&a, &b, 0).len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(store.history(&a, &b, 1000).len(), 60);
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(None, 50), 50);
        assert_eq!(resolve_limit(Some(0), 50), 50);
        assert_eq!(resolve_limit(Some(-5), 50), 50);
        assert_eq!(resolve_limit(Some(7), 50), 7);
    }

    #[test]
    fn test_retention_drops_oldest() {
        let mut store = ConversationStore::with_retention(Some(2));
        let a = UserId::from("a");
        let b = UserId::from("b");
        for body in ["one", "two", "three"] {
            store.append(&a, &b, message("a", "b", body));
        }

        let bodies: Vec<_> = store
            .history(&a, &b, 10)
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(bodies, vec!["two", "three"]);
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut store = ConversationStore::new();
        let a = UserId::from("a");
        let b = UserId::from("b");

        let first = message("a", "b", "first");
        let first_at = first.timestamp;
        let mut skewed = message("b", "a", "skewed");
        skewed.timestamp = first_at - Duration::seconds(30);

        store.append(&a, &b, first);
        store.append(&b, &a, skewed);

        let history = store.history(&a, &b, 10);
        assert_eq!(history[1].timestamp, first_at);
    }
}
