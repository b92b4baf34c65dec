//! Connection registry, broadcast loop and request correlation for the
//! Skyrelay position hub.
//!
//! Pilots, ATC clients, map viewers and the chat bridge all connect to one
//! hub. Telemetry flows in at whatever rate each client reports, is cached,
//! and is fanned out to subscribers on a fixed period. External actors can
//! ask one specific aircraft a question and get exactly one answer back.
//!
//! # Modules
//!
//! - [`broadcaster`] -- The periodic fan-out loop and its [`TickObserver`]
//!   hook.
//! - [`config`] -- Configuration loading from `skyrelay-config.yaml` into
//!   strongly-typed structs.
//! - [`correlation`] -- [`CorrelationBridge`], deduplicated request/response
//!   matching with timeouts.
//! - [`hub`] -- [`Hub`], the façade composing everything below.
//! - [`rate`] -- [`RateNegotiator`], fire-and-forget cadence changes.
//! - [`registry`] -- [`Registry`] of live connections, identities and group
//!   memberships.
//! - [`status_cache`] -- [`StatusCache`], latest telemetry per connection.
//!
//! [`TickObserver`]: broadcaster::TickObserver
//! [`CorrelationBridge`]: correlation::CorrelationBridge
//! [`Hub`]: hub::Hub
//! [`RateNegotiator`]: rate::RateNegotiator
//! [`Registry`]: registry::Registry
//! [`StatusCache`]: status_cache::StatusCache

pub mod broadcaster;
pub mod config;
pub mod correlation;
pub mod hub;
pub mod rate;
pub mod registry;
pub mod status_cache;

pub use broadcaster::{Broadcaster, NoOpObserver, TickObserver, TickReport};
pub use config::{ConfigError, RelayConfig};
pub use correlation::{CorrelationBridge, CorrelationError};
pub use hub::{AircraftView, DisconnectSummary, DispatchError, HousekeepingObserver, Hub};
pub use rate::{RateError, RateNegotiator};
pub use registry::{ConnectionInfo, ConnectionSender, Registry, RegistryError};
pub use status_cache::StatusCache;
