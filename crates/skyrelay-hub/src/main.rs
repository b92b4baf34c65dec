//! Hub binary for the Skyrelay position relay.
//!
//! This is the main entry point that wires together the hub, its HTTP and
//! `WebSocket` server and the periodic broadcaster, and runs them until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `skyrelay-config.yaml` (or `SKYRELAY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the hub with an in-memory route store
//! 4. Start the HTTP + `WebSocket` server
//! 5. Start the broadcaster with housekeeping on each tick
//! 6. Wait for `Ctrl-C`, cancel both tasks and wait for them to stop

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use skyrelay_core::config::{LogFormat, LoggingConfig};
use skyrelay_core::{HousekeepingObserver, Hub, RelayConfig};
use skyrelay_geo::{MemoryRouteStore, RouteStore};
use skyrelay_server::{AppState, Geocoder, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::HubError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "skyrelay-config.yaml";

/// Environment variable naming an alternative configuration file.
const CONFIG_PATH_ENV: &str = "SKYRELAY_CONFIG";

/// Application entry point for the hub.
///
/// # Errors
///
/// Returns an error if configuration, logging or the server cannot be
/// brought up, or if a background task fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // 2. Initialize structured logging.
    init_logging(&config.logging).context("initializing logging")?;
    info!(
        config = %config_path.display(),
        broadcast_interval_ms = config.hub.broadcast_interval_ms,
        request_timeout_ms = config.hub.request_timeout_ms,
        groups = ?config.hub.outbound_groups,
        "skyrelay-hub starting"
    );

    // 3. Build the hub.
    let routes: Arc<dyn RouteStore> = Arc::new(MemoryRouteStore::new());
    let hub = Arc::new(Hub::new(&config, routes));
    let geocoder = Geocoder::from_config(&config.geocoding);
    info!(geocoder = geocoder.name(), "Hub initialized");

    // 4. Start the server.
    let cancel = CancellationToken::new();
    let state = Arc::new(AppState::new(Arc::clone(&hub), geocoder));
    let server_config = ServerConfig::from(&config.server);
    let server = skyrelay_server::spawn_server(&server_config, state, cancel.child_token())
        .await
        .map_err(HubError::from)
        .context("starting server")?;

    // 5. Start the broadcaster.
    let broadcaster = hub.broadcaster();
    let broadcast_cancel = cancel.child_token();
    let housekeeping_hub = Arc::clone(&hub);
    let broadcast = tokio::spawn(async move {
        let mut observer = HousekeepingObserver::new(housekeeping_hub);
        broadcaster.run(broadcast_cancel, &mut observer).await
    });

    // 6. Run until Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    cancel.cancel();

    let total_ticks = broadcast.await.map_err(|e| HubError::Task {
        message: format!("broadcaster: {e}"),
    })?;
    server.await.map_err(|e| HubError::Task {
        message: format!("server: {e}"),
    })?;

    info!(total_ticks, "skyrelay-hub shutdown complete");
    Ok(())
}

/// Path of the configuration file: `SKYRELAY_CONFIG` or the default.
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// Environment overrides are applied either way.
fn load_config(path: &std::path::Path) -> Result<RelayConfig, HubError> {
    if path.exists() {
        Ok(RelayConfig::from_file(path)?)
    } else {
        let mut config = RelayConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_logging(logging: &LoggingConfig) -> Result<(), HubError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| HubError::Logging {
            message: format!("invalid log level {:?}: {e}", logging.level),
        })?;

    let installed = match logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
    installed.map_err(|e| HubError::Logging {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = load_config(std::path::Path::new("does-not-exist.yaml")).unwrap();
        assert_eq!(config.hub.broadcast_interval_ms, 2_000);
    }
}
