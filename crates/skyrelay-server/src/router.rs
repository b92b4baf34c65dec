//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for the map front end.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the hub.
///
/// The router includes:
/// - `GET /` -- health line
/// - `GET /ws` -- hub `WebSocket` connection
/// - `GET /api/aircraft` -- cached aircraft status
/// - `GET /api/connections` -- connection and group counts
/// - `GET /api/routes/{key}` -- stored simplified route
/// - `POST /api/rate` -- request an update-rate change
/// - `POST /api/bridge/command` -- chat-bridge command
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_connect))
        .route("/api/aircraft", get(handlers::list_aircraft))
        .route("/api/connections", get(handlers::list_connections))
        .route("/api/routes/{key}", get(handlers::get_route))
        .route("/api/rate", post(handlers::post_rate))
        .route("/api/bridge/command", post(handlers::bridge_command))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
