//! Connection handlers for the relay server.
//!
//! This module handles the HTTP surface, the connection lifecycle and
//! message processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::{ConnectionId, Handled, Outbound, Relay};
use relay_store::MessageStore;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay engine.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
    /// One permit per connection slot, held by the socket task.
    connection_slots: Arc<Semaphore>,
    shutting_down: AtomicBool,
}

impl AppState {
    /// Create new app state over a message store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let slots = config.limits.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            relay: Relay::new(store),
            config,
            connection_slots: Arc::new(Semaphore::new(slots)),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Stop admitting connections and terminate every registered one.
    ///
    /// A connection that registers concurrently sees the flag and removes
    /// itself, so none survives the drain.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Shutdown started, refusing new connections");
        }
        self.relay.drain();
        metrics::set_active_channels(0);
    }

    /// Whether [`begin_shutdown`](Self::begin_shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain every connection.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    let app = router(Arc::clone(&state));
    let draining = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            draining.begin_shutdown();
        })
        .await?;

    // Upgrades completed while the listener was closing.
    state.begin_shutdown();
    info!("Connections drained");

    Ok(())
}

/// Service banner.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": true,
        "message": "Welcome to the relay API"
    }))
}

/// JSON 404 for unmatched routes.
async fn not_found_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "status": false,
            "message": "Not found",
            "path": uri.path()
        })),
    )
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "channels": stats.channel_count
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.is_shutting_down() {
        metrics::record_refused();
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }

    let permit = match Arc::clone(&state.connection_slots).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                limit = state.config.limits.max_connections,
                "Connection limit reached, refusing upgrade"
            );
            metrics::record_refused();
            return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
        }
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, permit))
}

/// Handle a WebSocket connection.
///
/// The socket's writer drains the connection's outbound queue; inbound
/// frames are handled one at a time in arrival order.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: OwnedSemaphorePermit) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (outbox, mut outbound) = mpsc::unbounded_channel();
    let connection_id = state.relay.connect(outbox);

    if state.is_shutting_down() {
        state.relay.disconnect(connection_id);
        return;
    }

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            item = outbound.recv() => {
                match item {
                    Some(Outbound::Text(text)) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if sender.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Terminate) | None => {
                        debug!(connection = %connection_id, "Terminating connection");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, connection_id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let text = String::from_utf8_lossy(&data);
                        handle_inbound(&state, connection_id, &text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.relay.acknowledge_probe(connection_id);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Answered by the WebSocket layer.
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
        }
    }

    state.relay.disconnect(connection_id);
    metrics::set_active_channels(state.relay.stats().channel_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle one inbound text frame and record its outcome.
async fn handle_inbound(state: &AppState, connection_id: ConnectionId, raw: &str) {
    metrics::record_message(raw.len(), "inbound");
    let start = Instant::now();

    match state.relay.handle_text(connection_id, raw).await {
        Ok(Handled::Subscribed { .. }) => {
            metrics::record_subscription();
            metrics::set_active_channels(state.relay.stats().channel_count);
        }
        Ok(Handled::Published { recipients, .. }) => {
            metrics::record_publish(recipients, start.elapsed().as_secs_f64());
        }
        Err(e) => metrics::record_error(e.kind()),
    }
}
