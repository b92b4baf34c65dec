//! Shared application state for the HTTP and `WebSocket` handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skyrelay_core::Hub;

use crate::geocode::Geocoder;

/// State handed to every Axum handler.
///
/// The [`Hub`] is shared with the broadcaster task running beside the
/// server; handlers never hold a lock on it across an await.
#[derive(Debug)]
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<Hub>,
    /// Best-effort reverse geocoder for chat-bridge summaries.
    pub geocoder: Geocoder,
    /// When the server state was created.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create state around a hub and geocoder.
    pub fn new(hub: Arc<Hub>, geocoder: Geocoder) -> Self {
        Self {
            hub,
            geocoder,
            started_at: Utc::now(),
        }
    }
}
