//! Event dispatcher.
//!
//! A single task owns the [`Coordinator`] and applies commands one at a
//! time, so every event is fully handled before the next one starts.
//! Socket tasks talk to it through a cloneable [`DispatcherHandle`] and
//! receive outbound events through their [`Outbox`].

use crate::metrics;
use dashmap::DashMap;
use murmur_core::{ConnectionId, Coordinator, CoordinatorStats, CoreError, Delivery};
use murmur_protocol::{ClientEvent, ServerEvent, UserSummary};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Outbound queues of all open connections.
pub type Outboxes = Arc<DashMap<ConnectionId, Outbox>>;

/// Dispatcher errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher task has stopped.
    #[error("Dispatcher is not running")]
    Closed,
}

/// A unit of work for the dispatcher.
#[derive(Debug)]
enum Command {
    Connect(ConnectionId),
    Event(ConnectionId, ClientEvent),
    Disconnect(ConnectionId),
    Register {
        username: String,
        reply: oneshot::Sender<Result<UserSummary, CoreError>>,
    },
    OnlineUsers {
        reply: oneshot::Sender<Vec<UserSummary>>,
    },
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
}

/// Handle for submitting work to the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    fn submit(&self, command: Command) -> Result<(), DispatchError> {
        self.tx.send(command).map_err(|_| DispatchError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.submit(make(reply))?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Announce a newly opened connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn connect(&self, connection_id: ConnectionId) -> Result<(), DispatchError> {
        self.submit(Command::Connect(connection_id))
    }

    /// Submit an inbound event.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn event(&self, connection_id: ConnectionId, event: ClientEvent) -> Result<(), DispatchError> {
        self.submit(Command::Event(connection_id, event))
    }

    /// Announce a closed connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Result<(), DispatchError> {
        self.submit(Command::Disconnect(connection_id))
    }

    /// Register a new user.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped. Registration
    /// failures are returned in the inner result.
    pub async fn register(
        &self,
        username: impl Into<String>,
    ) -> Result<Result<UserSummary, CoreError>, DispatchError> {
        let username = username.into();
        self.request(|reply| Command::Register { username, reply })
            .await
    }

    /// Snapshot of online users.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub async fn online_users(&self) -> Result<Vec<UserSummary>, DispatchError> {
        self.request(|reply| Command::OnlineUsers { reply }).await
    }

    /// Coordinator statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher has stopped.
    pub async fn stats(&self) -> Result<CoordinatorStats, DispatchError> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

/// The task that owns the coordinator.
pub struct Dispatcher {
    coordinator: Coordinator,
    outboxes: Outboxes,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Dispatcher {
    /// Spawn the dispatcher task.
    ///
    /// The task runs until every [`DispatcherHandle`] is dropped.
    #[must_use]
    pub fn spawn(coordinator: Coordinator, outboxes: Outboxes) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            coordinator,
            outboxes,
            rx,
        };
        let task = tokio::spawn(dispatcher.run());
        (DispatcherHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("Dispatcher started");
        while let Some(command) = self.rx.recv().await {
            let start = Instant::now();
            self.apply(command);
            metrics::record_latency(start.elapsed().as_secs_f64());
        }
        info!("Dispatcher stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect(connection_id) => {
                self.coordinator.connect(connection_id);
            }
            Command::Event(connection_id, event) => {
                metrics::record_event(event.name());
                trace!(connection = %connection_id, event = event.name(), "Handling event");
                let deliveries = self.coordinator.handle(&connection_id, event);
                self.deliver(deliveries);
            }
            Command::Disconnect(connection_id) => {
                let deliveries = self.coordinator.disconnect(&connection_id);
                self.deliver(deliveries);
            }
            Command::Register { username, reply } => {
                let result = self.coordinator.register(&username);
                if let Err(e) = &result {
                    metrics::record_error(e.kind());
                }
                if reply.send(result).is_err() {
                    debug!("Registration requester went away");
                }
            }
            Command::OnlineUsers { reply } => {
                let _ = reply.send(self.coordinator.online_users());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.coordinator.stats());
            }
        }

        let stats = self.coordinator.stats();
        metrics::set_users(stats.online_count, stats.user_count);
    }

    /// Hand each delivery to its connection's outbox.
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { target, event } in deliveries {
            let name = event.name();
            if matches!(event, ServerEvent::Error { .. }) {
                metrics::record_error("rejected_event");
            }

            let sent = self
                .outboxes
                .get(&target)
                .map(|outbox| outbox.send(event).is_ok())
                .unwrap_or(false);

            if sent {
                metrics::record_delivery(name);
            } else {
                warn!(connection = %target, event = name, "Dropping event for closed connection");
                metrics::record_error("undeliverable");
            }
        }
    }
}
