// apps/kernel-server/src/main.rs
// Purpose: Entry point. Builds the storage backend, spawns the hub,
// and starts the HTTP/WebSocket server.
// Architecture: Application Boot
// Dependencies: Axum, Tower, Tokio

mod action;
mod config;
mod error;
mod hub;
mod models;
mod observability;
mod server;
mod session;
mod storage;
mod wire;

use std::sync::Arc;

use axum::{
    http::Method,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::server::handlers;
use crate::server::AppState;
use crate::storage::{InMemoryStorage, RedisStorage, Storage};

#[tokio::main]
async fn main() {
    observability::init_tracing();

    let config = Config::from_env();
    tracing::info!("initializing sync kernel...");

    let backend: Arc<dyn Storage> = match &config.redis_url {
        Some(redis_url) => {
            let storage = RedisStorage::new(redis_url).expect("invalid REDIS_URL");
            tracing::info!("using Redis storage backend");
            Arc::new(storage)
        }
        None => {
            tracing::warn!("REDIS_URL not set; using in-process storage, state will not survive a restart");
            Arc::new(InMemoryStorage::new())
        }
    };

    let hub = hub::spawn(backend, config.save_frequency);
    let state = Arc::new(AppState { hub });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ws/:project_name/:task_id", get(handlers::ws_task_stream))
        .layer(cors)
        .with_state(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to port");

    tracing::info!("sync kernel listening on http://{}", addr);

    axum::serve(listener, app).await.expect("server error");
}