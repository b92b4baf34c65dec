//! Error types for the hub binary.
//!
//! [`HubError`] is the top-level error type that wraps all possible
//! failure modes during startup and shutdown.

/// Top-level error for the hub binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that startup helpers can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: skyrelay_core::ConfigError,
    },

    /// The HTTP server failed to start.
    #[error("server error: {source}")]
    Server {
        /// The underlying startup error.
        #[from]
        source: skyrelay_server::StartupError,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// A background task panicked or was aborted.
    #[error("task error: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}
