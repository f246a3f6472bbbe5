//! Network surface: the OCPP WebSocket endpoint plus a thin HTTP API for
//! issuing commands and reading the availability snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tower_http::trace::TraceLayer;

use crate::bus::{AvailabilityMap, Command, CommandAction, CommandDrain};
use crate::ocpp::Engine;
use crate::registry::StationRegistry;

pub mod connection;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StationRegistry>,
    pub engine: Arc<Engine>,
    pub commands: CommandDrain,
    pub command_tx: mpsc::Sender<Command>,
    pub availability: Arc<watch::Sender<AvailabilityMap>>,
    pub availability_rx: watch::Receiver<AvailabilityMap>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ocpp", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/stations", get(list_stations))
        .route("/stations/:station_id/commands", post(enqueue_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.protocols(["ocpp1.6"])
        .on_upgrade(move |socket| connection::run(socket, peer, state))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Identified stations currently addressable by commands.
async fn list_stations(State(state): State<AppState>) -> Json<AvailabilityMap> {
    Json(state.availability_rx.borrow().clone())
}

/// Enqueue a remote command for a station. Delivery is asynchronous; the
/// station's answer comes back through the protocol, not this endpoint.
async fn enqueue_command(
    State(state): State<AppState>,
    Path(station_id): Path<String>,
    Json(action): Json<CommandAction>,
) -> impl IntoResponse {
    match state.command_tx.try_send(Command { station_id, action }) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "Queued" }))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "Rejected", "message": "command queue is full" })),
        ),
    }
}
