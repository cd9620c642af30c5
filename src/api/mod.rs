//! HTTP/WebSocket router and shared application state.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::core::SignalingCore;
use crate::ws;

/// Shared state handed to every handler. Cloning is cheap: `core` is an
/// `Arc`, and `config` is read once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<SignalingCore>,
    pub config: Config,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let core = SignalingCore::new(config.clone());
        Self { core, config }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tokens: usize,
    waiting: usize,
    rooms: usize,
    uptime_secs: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.core.health();
    Json(HealthResponse {
        status: "ok",
        tokens: counts.tokens,
        waiting: counts.waiting,
        rooms: counts.rooms,
        uptime_secs: counts.uptime_secs,
    })
}

#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
