// apps/kernel-server/src/server/mod.rs
// Purpose: The HTTP/WebSocket surface and the state threaded through it.
// Architecture: API Layer
// Dependencies: Axum

pub mod handlers;

use crate::hub::HubHandle;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
}
