//! Relay server core: shared state, WebSocket handler, HTTP routes, and
//! server startup.
//!
//! Each accepted socket gets a [`ConnectionId`], a writer task fed by an
//! unbounded channel, and a reader task that feeds text frames through the
//! [`router`](crate::router) one at a time. When either task ends the
//! connection is unregistered.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bazaar_proto::ids::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{AllowedOrigin, RelayConfig};
use crate::registry::{Outbox, Registry, RegistryStats};
use crate::router::{self, Connection, Dispatch};

/// Default maximum WebSocket frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Errors returned when starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Could not read back the bound address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Shared relay server state: the registry plus transport settings.
pub struct RelayState {
    registry: Registry,
    /// Every accepted socket, joined or not, keyed by connection id.
    live: Mutex<HashMap<ConnectionId, Outbox>>,
    allowed_origin: AllowedOrigin,
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state that accepts any origin, with the default frame
    /// size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            live: Mutex::new(HashMap::new()),
            allowed_origin: AllowedOrigin::Any,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates relay state from a resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            registry: Registry::new(),
            live: Mutex::new(HashMap::new()),
            allowed_origin: config.allowed_origin.clone(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// The connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tracks an accepted socket until [`RelayState::untrack`] is called.
    pub fn track(&self, conn: ConnectionId, outbox: Outbox) {
        self.live.lock().insert(conn, outbox);
    }

    /// Stops tracking a socket. Unknown ids are ignored.
    pub fn untrack(&self, conn: ConnectionId) {
        self.live.lock().remove(&conn);
    }

    /// Number of open sockets, including ones that have not joined.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.live.lock().len()
    }

    /// Send a WebSocket Close frame to every open socket.
    ///
    /// Each connection's writer task forwards the frame, which makes the
    /// client close its side. Used for graceful shutdown.
    pub fn close_all_connections(&self) {
        let live = self.live.lock();
        for (conn, outbox) in live.iter() {
            tracing::info!(conn = %conn, "sending close frame");
            let _ = outbox.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Mint a connection id; the connection starts unjoined.
/// 2. Spawn a writer task draining the connection's outbox into the socket.
/// 3. Dispatch each inbound text frame in arrival order.
/// 4. On close, error or end of stream, stop tracking the socket and remove
///    its registry entry.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn_id = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tracing::debug!(conn = %conn_id, "connection opened");
    state.track(conn_id, tx.clone());

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    let connection = Connection::new(conn_id, tx);
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let outcome =
                        router::dispatch_frame(reader_state.registry(), &connection, text.as_str());
                    log_dispatch(conn_id, &outcome);
                }
                Message::Close(_) => {
                    tracing::debug!(conn = %conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames carry no events.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.untrack(conn_id);
    match router::disconnect(state.registry(), conn_id) {
        Some(user) => tracing::info!(conn = %conn_id, user = %user, "user disconnected"),
        None => tracing::debug!(conn = %conn_id, "connection closed before joining"),
    }
}

fn log_dispatch(conn: ConnectionId, outcome: &Dispatch) {
    match outcome {
        Dispatch::Joined { user, outcome } => {
            tracing::info!(conn = %conn, user = %user, outcome = ?outcome, "joined room");
        }
        Dispatch::Delivered {
            event,
            room,
            recipients,
        } => {
            tracing::debug!(conn = %conn, event, room = %room, recipients, "event delivered");
        }
        Dispatch::Dropped(reason) => {
            tracing::debug!(conn = %conn, reason = %reason, "event dropped");
        }
    }
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
///
/// Browser requests whose `Origin` is not the allowed origin are refused
/// with `403`. Requests without an `Origin` header are not from a browser
/// page and are let through.
async fn ws_handler(
    headers: HeaderMap,
    State(state): State<Arc<RelayState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN)
        && !state.allowed_origin.permits(origin)
    {
        tracing::warn!(origin = ?origin, "rejected connection from disallowed origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_frame_size(state.max_frame_size)
        .max_message_size(state.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Liveness report returned by `GET /health`.
#[derive(Debug, serde::Serialize)]
struct HealthReport {
    status: &'static str,
    #[serde(flatten)]
    stats: RegistryStats,
}

async fn health(State(state): State<Arc<RelayState>>) -> axum::Json<HealthReport> {
    axum::Json(HealthReport {
        status: "ok",
        stats: state.registry().stats(),
    })
}

/// Builds the HTTP router: `/ws` and `/socket` upgrade to the relay
/// protocol, `/health` reports counters.
pub fn app(state: Arc<RelayState>) -> axum::Router {
    let cors = match &state.allowed_origin {
        AllowedOrigin::Any => CorsLayer::new().allow_origin(AllowOrigin::any()),
        AllowedOrigin::Exact(origin) => {
            CorsLayer::new().allow_origin(AllowOrigin::exact(origin.clone()))
        }
    };

    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/socket", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns [`ServerError`] if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns [`ServerError`] if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}
