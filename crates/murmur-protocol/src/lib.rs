//! # murmur-protocol
//!
//! Wire vocabulary for the murmur private messaging server.
//!
//! Clients and the server exchange named events over a persistent
//! WebSocket. Every event travels in the same envelope:
//!
//! ```json
//! { "event": "send-message", "data": { "recipientId": "…", "message": "hi" } }
//! ```
//!
//! Text frames carry the envelope as JSON. Binary frames carry it as
//! MessagePack behind a 4-byte length prefix (see [`codec`]).
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ClientEvent, UserId};
//!
//! let event = ClientEvent::Login { user_id: UserId::from("u-1") };
//! let text = codec::encode_json(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_json(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::ProtocolError;
pub use events::{ChatMessage, ClientEvent, MessageId, ServerEvent, UserId, UserSummary};
