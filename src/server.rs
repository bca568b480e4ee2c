//! HTTP ingest and live WebSocket feed.
//!
//! - `POST <ingest_path>` (default `/esp32Test`): `{"ir": [...], "red": [...]}` batches.
//!   Malformed or non-JSON bodies are accepted as no-ops.
//! - `POST /api/v1/relabel`: `{"label": <string | object>}`.
//! - `GET /health`: current label and buffer sizes.
//! - `GET /ws`: every [`PipelineEvent`] as JSON. Clients may send
//!   `{"event": "reset_data", "label": ...}` to relabel, or omit the label to
//!   flush and clear the session under its current label.
//!
//! Each WebSocket client reads from its own broadcast receiver, so a slow client
//! only ever loses its own oldest events.

use crate::config::AppConfig;
use crate::core::{ArchiveSink, PipelineEvent};
use crate::error::{AppResult, PpgError};
use crate::pipeline::{collapse_label, Pipeline};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Pipeline shared by all handlers.
    pub pipeline: Arc<Pipeline>,
    /// Sender every WebSocket client subscribes to.
    pub events: broadcast::Sender<PipelineEvent>,
}

impl AppState {
    /// Wires a pipeline to a fresh broadcast channel.
    pub fn new(config: &AppConfig, archive: Arc<dyn ArchiveSink>) -> Self {
        let (events, _) = broadcast::channel(config.server.broadcast_capacity);
        let pipeline = Pipeline::new(config, Arc::new(events.clone()), archive);
        Self {
            pipeline: Arc::new(pipeline),
            events,
        }
    }

    /// New receiver for one live client.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }
}

/// Builds the service routes; `ingest_path` receives sample batches.
pub fn router(state: AppState, ingest_path: &str) -> Router {
    Router::new()
        .route(ingest_path, post(receive_data))
        .route("/api/v1/relabel", post(relabel))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the configured address and serves until the process is stopped.
pub async fn serve(config: &AppConfig, state: AppState) -> AppResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| PpgError::Configuration(format!("Invalid bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, ingest = %config.server.ingest_path, "PPG server listening");

    axum::serve(listener, router(state, &config.server.ingest_path))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;
    info!("PPG server stopped");
    Ok(())
}

async fn receive_data(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    debug!(bytes = body.len(), "Received batch");

    let pipeline = Arc::clone(&state.pipeline);
    // Estimation is CPU work; keep it off the async workers.
    match tokio::task::spawn_blocking(move || pipeline.ingest_json(&payload)).await {
        Ok(_) => Json(json!({ "message": "Data received successfully" })).into_response(),
        Err(e) => {
            error!(error = %e, "Ingest task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn relabel(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match body.get("label").and_then(collapse_label) {
        Some(label) => Json(state.pipeline.relabel(label).await).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'label'" })),
        )
            .into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let status = state.pipeline.status();
    Json(json!({
        "status": "ok",
        "label": status.label,
        "window_len": status.window_len,
        "archive_len": status.archive_len,
        "threshold": status.threshold,
        "subscribers": state.events.receiver_count(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws_client(socket, state))
}

async fn handle_ws_client(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();
    info!("WebSocket client connected");

    let forward = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "WebSocket client lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&text, &state).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    forward.abort();
    info!("WebSocket client disconnected");
}

/// Handles `{"event": "reset_data", "label": ...}`; anything else is ignored.
/// Without a label the session is flushed and cleared under its current label.
async fn handle_client_message(text: &str, state: &AppState) {
    let request: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON WebSocket message");
            return;
        }
    };
    if request.get("event").and_then(Value::as_str) != Some("reset_data") {
        debug!("Ignoring unknown WebSocket event");
        return;
    }
    let outcome = match request.get("label").and_then(collapse_label) {
        Some(label) => state.pipeline.relabel(label).await,
        None => state.pipeline.reset().await,
    };
    debug!(label = %outcome.label, archived = outcome.archived_samples, "reset_data handled");
}
