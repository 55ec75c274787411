//! # murmur-core
//!
//! Presence and messaging coordinator for the murmur private messaging server.
//!
//! This crate holds all shared state of the server and the rules for
//! mutating it:
//!
//! - **Registry** - registered users and their presence
//! - **Bindings** - which connection is authenticated as which user
//! - **ConversationStore** - per-pair message history
//! - **Coordinator** - the event state machine that ties them together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────────┐
//! │ ClientEvent │────▶│ Coordinator │────▶│ Vec<Delivery>     │
//! └─────────────┘     └─────────────┘     └───────────────────┘
//!                      │     │     │
//!                      ▼     ▼     ▼
//!               Registry  Bindings  ConversationStore
//! ```
//!
//! The coordinator is a plain synchronous value. It performs no I/O; the
//! caller feeds it one event at a time and forwards the returned
//! deliveries to the right connections.

pub mod binding;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod registry;

pub use binding::{Bindings, ChannelState, ConnectionId};
pub use conversation::{ConversationKey, ConversationStore, DEFAULT_HISTORY_LIMIT};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorStats, Delivery};
pub use error::CoreError;
pub use registry::{Registry, User};
