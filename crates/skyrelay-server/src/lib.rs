//! HTTP and `WebSocket` transport for the Skyrelay position hub.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) through which pilots, ATC clients and
//!   map viewers exchange `type`-tagged JSON messages with the hub
//! - **REST endpoints** for reading live state (aircraft, connections,
//!   stored routes) and requesting update-rate changes
//! - **Chat-bridge endpoint** (`/api/bridge/command`) that runs `!finfo`,
//!   `!fplan` and `!rate` commands and returns the text to post back
//!
//! # Architecture
//!
//! Every socket is an actor: a writer task drains the connection's
//! outbound queue, and a reader loop dispatches inbound frames into the
//! shared [`Hub`](skyrelay_core::Hub). REST and bridge handlers call the
//! same hub. Reverse geocoding for bridge summaries is best-effort.

pub mod bridge;
pub mod error;
pub mod geocode;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ServerApiError;
pub use geocode::Geocoder;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, bind, serve};
pub use startup::{StartupError, spawn_server};
pub use state::AppState;
