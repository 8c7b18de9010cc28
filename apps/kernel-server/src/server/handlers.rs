// apps/kernel-server/src/server/handlers.rs
// Purpose: API handlers: liveness, metrics snapshot, and the WebSocket
// upgrade that hands a connection off to a new session.
// Architecture: API Layer
// Dependencies: Axum, the hub and session layers

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::server::AppState;
use crate::session;

#[derive(serde::Serialize)]
pub struct HealthResponse {
    status: String,
    message: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "sync kernel is running".to_string(),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.metrics.snapshot())
}

pub async fn ws_task_stream(
    State(state): State<Arc<AppState>>,
    Path((project_name, task_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_session(socket, state.hub.clone(), project_name, task_id))
}
