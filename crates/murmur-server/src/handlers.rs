//! HTTP and WebSocket handlers for the murmur server.
//!
//! This module handles the connection lifecycle, frame decoding and the
//! registration and roster endpoints.

use crate::config::Config;
use crate::dispatcher::{DispatchError, Dispatcher, DispatcherHandle, Outboxes};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use murmur_core::{ConnectionId, Coordinator, CoreError};
use murmur_protocol::{codec, ClientEvent, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the coordinator task.
    pub dispatcher: DispatcherHandle,
    /// Outbound queues of open sockets.
    pub outboxes: Outboxes,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state and spawn the dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let outboxes: Outboxes = Arc::new(DashMap::new());
        let coordinator = Coordinator::with_config(config.coordinator());
        let (dispatcher, _task) = Dispatcher::spawn(coordinator, outboxes.clone());

        Self {
            dispatcher,
            outboxes,
            config,
        }
    }
}

/// Wire encoding used by a socket; follows the last frame it sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Json,
    MessagePack,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/api/register", post(register_handler))
        .route("/api/users/online", get(online_users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("murmur listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the app on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops abnormally.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.dispatcher.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "users": stats.user_count,
            "online": stats.online_count,
            "connections": stats.connection_count,
            "conversations": stats.conversation_count,
        }))
        .into_response(),
        Err(e) => unavailable(&e),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
}

/// Registration handler.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match state.dispatcher.register(request.username).await {
        Ok(Ok(user)) => (StatusCode::CREATED, Json(user)).into_response(),
        Ok(Err(e)) => {
            let status = match e {
                CoreError::NameTaken => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => unavailable(&e),
    }
}

/// Online roster handler.
async fn online_users_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.dispatcher.online_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => unavailable(&e),
    }
}

fn unavailable(error: &DispatchError) -> Response {
    error!(error = %error, "Request failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.outboxes.len() >= state.config.limits.max_connections {
        warn!("Connection limit reached, refusing upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.max_message_size(state.config.limits.max_frame_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();
    state.outboxes.insert(connection_id.clone(), outbox);
    if let Err(e) = state.dispatcher.connect(connection_id.clone()) {
        error!(connection = %connection_id, error = %e, "Failed to attach connection");
        state.outboxes.remove(&connection_id);
        return;
    }

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut encoding = Encoding::Json;

    let period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Events routed to this connection by the dispatcher
            Some(event) = inbox.recv() => {
                if send_event(&mut sender, &event, encoding).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        encoding = Encoding::Json;
                        metrics::record_frame(text.len(), "inbound");

                        let decoded = codec::decode_json::<ClientEvent>(&text);
                        if dispatch(decoded, &connection_id, &state, &mut sender, encoding).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        encoding = Encoding::MessagePack;
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let mut failed = false;
                        loop {
                            let decoded = match codec::decode_binary_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => Ok(event),
                                Ok(None) => break,
                                Err(e) => {
                                    read_buffer.clear();
                                    Err(e)
                                }
                            };
                            let stop = decoded.is_err();
                            if dispatch(decoded, &connection_id, &state, &mut sender, encoding).await.is_err() {
                                failed = true;
                                break;
                            }
                            if stop {
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    metrics::record_error("heartbeat_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // A dropped transport is treated exactly like a logout.
    state.outboxes.remove(&connection_id);
    if let Err(e) = state.dispatcher.disconnect(connection_id.clone()) {
        error!(connection = %connection_id, error = %e, "Failed to detach connection");
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Forward a decoded event to the dispatcher, or report a decode error
/// to the client.
async fn dispatch(
    decoded: Result<ClientEvent, murmur_protocol::ProtocolError>,
    connection_id: &ConnectionId,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    encoding: Encoding,
) -> Result<()> {
    match decoded {
        Ok(event) => {
            debug!(connection = %connection_id, event = event.name(), "Event received");
            state.dispatcher.event(connection_id.clone(), event)?;
        }
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Invalid event");
            metrics::record_error("protocol");
            let reply = ServerEvent::error(format!("Invalid event: {e}"));
            send_event(sender, &reply, encoding).await?;
        }
    }
    Ok(())
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    encoding: Encoding,
) -> Result<()> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(event)?),
        Encoding::MessagePack => Message::Binary(codec::encode_binary(event)?.to_vec()),
    };
    let size = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_frame(size, "outbound");
    sender.send(message).await?;
    Ok(())
}
