//! REST API endpoint handlers.
//!
//! All reads come straight from the shared [`Hub`](skyrelay_core::Hub);
//! nothing here blocks the broadcaster.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Plain-text health line |
//! | `GET` | `/api/aircraft` | Cached status of every identified aircraft |
//! | `GET` | `/api/connections` | Connection count and group membership |
//! | `GET` | `/api/routes/{key}` | Stored simplified route |
//! | `POST` | `/api/rate` | Ask an aircraft to change its cadence |
//! | `POST` | `/api/bridge/command` | Run a chat-bridge command |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use skyrelay_core::RateError;

use crate::bridge::{self, BridgeRequest};
use crate::error::ServerApiError;
use crate::state::AppState;

/// Body of `POST /api/rate`.
#[derive(Debug, serde::Deserialize)]
pub struct RateRequest {
    /// Callsign of the target aircraft.
    pub callsign: String,
    /// Desired updates per second.
    pub hz: f64,
}

// ---------------------------------------------------------------------------
// GET / -- health line
// ---------------------------------------------------------------------------

/// Report that the hub is up, with a couple of live counts.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    format!(
        "skyrelay hub ok: {} connections, {} aircraft, up {uptime}s",
        state.hub.registry().len(),
        state.hub.cache().len(),
    )
}

// ---------------------------------------------------------------------------
// GET /api/aircraft
// ---------------------------------------------------------------------------

/// List the cached status of every aircraft with a live connection.
pub async fn list_aircraft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let aircraft = state.hub.aircraft();
    Json(serde_json::json!({
        "count": aircraft.len(),
        "aircraft": aircraft,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/connections
// ---------------------------------------------------------------------------

/// Connection count, per-group membership and every live connection.
pub async fn list_connections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.hub.registry();
    Json(serde_json::json!({
        "count": registry.len(),
        "groups": registry.group_counts(),
        "connections": registry.connections(),
        "requests_in_flight": state.hub.requests_in_flight(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/routes/{key}
// ---------------------------------------------------------------------------

/// Fetch the simplified route stored under `key`.
pub async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerApiError> {
    let route = state
        .hub
        .routes()
        .get(&key)
        .ok_or_else(|| ServerApiError::NotFound(format!("route {key}")))?;

    Ok(Json(serde_json::json!({
        "key": key,
        "count": route.len(),
        "points": route.points(),
    })))
}

// ---------------------------------------------------------------------------
// POST /api/rate
// ---------------------------------------------------------------------------

/// Ask the aircraft flying under a callsign to report at a new cadence.
///
/// Answers `202 Accepted` once the command is queued; compliance is not
/// awaited.
pub async fn post_rate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RateRequest>,
) -> Result<impl IntoResponse, ServerApiError> {
    let target = state
        .hub
        .change_update_rate(&request.callsign, request.hz)
        .map_err(|e| match e {
            RateError::InvalidRate { .. } => ServerApiError::BadRequest(e.to_string()),
            RateError::CallsignNotFound { .. } | RateError::Delivery(_) => {
                ServerApiError::NotFound(format!("callsign {}", request.callsign))
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "connection_id": target,
            "callsign": request.callsign,
            "hz": request.hz,
        })),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/bridge/command
// ---------------------------------------------------------------------------

/// Run a chat-bridge command and return the text to post back.
///
/// Always `200 OK`: usage hints and "not connected" are replies, not
/// errors.
pub async fn bridge_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BridgeRequest>,
) -> impl IntoResponse {
    Json(bridge::execute(&state, &request).await)
}
