// apps/kernel-server/src/observability.rs
// Purpose: Tracing bootstrap and the hub metrics snapshot shape.
// Architecture: Cross-cutting
// Dependencies: tracing-subscriber, Serde

use serde::Serialize;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sync_kernel=debug".parse().unwrap())
                .add_directive("tower_http=trace".parse().unwrap()),
        )
        .init();
}

/// Point-in-time counters maintained by the hub loop. Not part of the
/// wire protocol and never persisted; exposed read-only via `/metrics`
/// for operational visibility.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubMetrics {
    pub actions_applied: u64,
    pub actions_rejected: u64,
    pub active_sessions: usize,
    pub active_tasks: usize,
}
