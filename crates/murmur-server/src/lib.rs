//! # murmur-server
//!
//! WebSocket front end for the murmur presence and messaging coordinator.
//!
//! - [`config`] - layered file/environment configuration
//! - [`dispatcher`] - the single task that owns all coordinator state
//! - [`handlers`] - axum routes and the per-socket loop
//! - [`metrics`] - Prometheus instrumentation

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod metrics;

pub use crate::config::Config;
pub use crate::dispatcher::{DispatchError, Dispatcher, DispatcherHandle};
pub use crate::handlers::{build_router, run_server, serve, AppState};
