//! Configuration loading and typed config structures for the Skyrelay hub.
//!
//! The canonical configuration lives in `skyrelay-config.yaml` next to the
//! binary. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty or missing file yields a working
//! hub.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use skyrelay_types::Group;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level hub configuration.
///
/// Mirrors the structure of `skyrelay-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelayConfig {
    /// Broadcast cadence, request timeouts and rate limits.
    #[serde(default)]
    pub hub: HubConfig,

    /// Route recording and simplification.
    #[serde(default)]
    pub routes: RouteConfig,

    /// HTTP/WebSocket listener.
    #[serde(default)]
    pub server: ServerSettings,

    /// Best-effort reverse geocoding for chat-bridge replies.
    #[serde(default)]
    pub geocoding: GeocodingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values after parsing:
    /// - `SKYRELAY_PORT` overrides `server.port`
    /// - `SKYRELAY_GEOCODER_URL` overrides `geocoding.base_url`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("SKYRELAY_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Ok(val) = std::env::var("SKYRELAY_GEOCODER_URL") {
            self.geocoding.base_url = val;
        }
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.broadcast_interval_ms == 0 {
            return Err(invalid("hub.broadcast_interval_ms", "must be greater than zero"));
        }
        if self.hub.request_timeout_ms == 0 {
            return Err(invalid("hub.request_timeout_ms", "must be greater than zero"));
        }
        if !self.hub.min_update_rate_hz.is_finite() || self.hub.min_update_rate_hz <= 0.0 {
            return Err(invalid("hub.min_update_rate_hz", "must be a positive number"));
        }
        if !self.hub.max_update_rate_hz.is_finite()
            || self.hub.max_update_rate_hz < self.hub.min_update_rate_hz
        {
            return Err(invalid(
                "hub.max_update_rate_hz",
                "must be a number no smaller than hub.min_update_rate_hz",
            ));
        }
        if !self.routes.simplify_tolerance.is_finite() || self.routes.simplify_tolerance <= 0.0 {
            return Err(invalid("routes.simplify_tolerance", "must be a positive number"));
        }
        if self.geocoding.enabled && self.geocoding.base_url.trim().is_empty() {
            return Err(invalid("geocoding.base_url", "required when geocoding is enabled"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

/// Hub timing and rate configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubConfig {
    /// Period of the position broadcaster, in milliseconds.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    /// How long a correlated request waits for its answer, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Lowest update rate a client may be asked to adopt.
    #[serde(default = "default_min_update_rate_hz")]
    pub min_update_rate_hz: f64,

    /// Highest update rate a client may be asked to adopt.
    #[serde(default = "default_max_update_rate_hz")]
    pub max_update_rate_hz: f64,

    /// Groups that receive periodic position broadcasts.
    #[serde(default = "default_outbound_groups")]
    pub outbound_groups: Vec<Group>,
}

impl HubConfig {
    /// Broadcast period as a [`Duration`].
    pub const fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Correlated request timeout as a [`Duration`].
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            min_update_rate_hz: default_min_update_rate_hz(),
            max_update_rate_hz: default_max_update_rate_hz(),
            outbound_groups: default_outbound_groups(),
        }
    }
}

/// Route recording configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteConfig {
    /// Douglas-Peucker tolerance in degrees.
    #[serde(default = "default_simplify_tolerance")]
    pub simplify_tolerance: f64,

    /// Tracks with fewer recorded points than this are discarded.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            simplify_tolerance: default_simplify_tolerance(),
            min_points: default_min_points(),
        }
    }
}

/// Listener address for the HTTP/WebSocket server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Reverse geocoding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeocodingConfig {
    /// Whether chat-bridge replies are enriched with a place name.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of a Nominatim-compatible reverse geocoding service.
    #[serde(default = "default_geocoder_url")]
    pub base_url: String,

    /// `User-Agent` sent with geocoding requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_geocoder_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_geocoder_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_geocoder_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_broadcast_interval_ms() -> u64 {
    2000
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

const fn default_min_update_rate_hz() -> f64 {
    0.1
}

const fn default_max_update_rate_hz() -> f64 {
    30.0
}

fn default_outbound_groups() -> Vec<Group> {
    Group::ALL.to_vec()
}

const fn default_simplify_tolerance() -> f64 {
    0.0001
}

const fn default_min_points() -> usize {
    2
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8080
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org".to_owned()
}

fn default_user_agent() -> String {
    "skyrelay-hub/0.1".to_owned()
}

const fn default_geocoder_timeout_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hub.broadcast_interval_ms, 2000);
        assert_eq!(config.hub.outbound_groups.len(), 3);
        assert_eq!(config.routes.min_points, 2);
        assert!(!config.geocoding.enabled);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
hub:
  broadcast_interval_ms: 500
  request_timeout_ms: 2500
  min_update_rate_hz: 0.5
  max_update_rate_hz: 10
  outbound_groups: [Map, ATC]

routes:
  simplify_tolerance: 0.001
  min_points: 5

server:
  host: "127.0.0.1"
  port: 9090

geocoding:
  enabled: true
  base_url: "http://geo.internal"
  timeout_ms: 800

logging:
  level: "debug"
  format: json
"#;

        let config = RelayConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.hub.broadcast_interval(), Duration::from_millis(500));
        assert_eq!(config.hub.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.hub.outbound_groups, vec![Group::Map, Group::Atc]);
        assert_eq!(config.routes.min_points, 5);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.geocoding.enabled);
        assert_eq!(config.geocoding.timeout_ms, 800);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = RelayConfig::parse("hub:\n  broadcast_interval_ms: 1000\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();
        assert_eq!(config.hub.broadcast_interval_ms, 1000);
        assert_eq!(config.hub.request_timeout_ms, 10_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(RelayConfig::parse("").is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = RelayConfig::parse("hub:\n  broadcast_interval_ms: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "hub.broadcast_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn inverted_rate_bounds_are_rejected() {
        let yaml = "hub:\n  min_update_rate_hz: 5\n  max_update_rate_hz: 1\n";
        assert!(matches!(
            RelayConfig::parse(yaml),
            Err(ConfigError::Invalid {
                field: "hub.max_update_rate_hz",
                ..
            })
        ));
    }

    #[test]
    fn non_positive_tolerance_is_rejected() {
        let yaml = "routes:\n  simplify_tolerance: 0\n";
        assert!(matches!(
            RelayConfig::parse(yaml),
            Err(ConfigError::Invalid {
                field: "routes.simplify_tolerance",
                ..
            })
        ));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("skyrelay-config.yaml");
        if path.exists() {
            let config = RelayConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
