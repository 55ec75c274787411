//! Shared fixtures for murmur benchmarks.

use murmur_core::{ConnectionId, Coordinator};
use murmur_protocol::{ClientEvent, UserId};

/// A coordinator with `users` registered users, each logged in on
/// connection `conn-<n>`.
#[must_use]
pub fn populated(users: usize) -> (Coordinator, Vec<(ConnectionId, UserId)>) {
    let mut coordinator = Coordinator::new();
    let mut sessions = Vec::with_capacity(users);

    for n in 0..users {
        let user = coordinator
            .register(&format!("user{n}"))
            .expect("fixture names are valid and unique");
        let connection_id = ConnectionId::new(format!("conn-{n}"));
        coordinator.connect(connection_id.clone());
        coordinator.handle(
            &connection_id,
            ClientEvent::Login {
                user_id: user.user_id.clone(),
            },
        );
        sessions.push((connection_id, user.user_id));
    }

    (coordinator, sessions)
}
