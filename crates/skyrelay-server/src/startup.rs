//! Server startup helper for embedding in the hub binary.
//!
//! Provides [`spawn_server`] which binds the listener eagerly, so address
//! errors surface at startup, and then serves on a background Tokio task
//! alongside the broadcaster.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::server::{self, ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Bind and spawn the HTTP + `WebSocket` server on a background task.
///
/// The task runs until `cancel` fires. The caller should hold the returned
/// handle and await it during clean shutdown.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the listener cannot bind.
pub async fn spawn_server(
    config: &ServerConfig,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = server::bind(config).await?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state, cancel).await {
            tracing::error!(error = %e, "Hub server exited with error");
        }
    });

    tracing::info!(port = config.port, "Hub server spawned on background task");

    Ok(handle)
}
