//! Shared type definitions for the Skyrelay position hub.
//!
//! Every type that crosses a connection boundary lives here so the hub,
//! its tests and the map front end agree on one shape. Types flow to
//! `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Connection and client identifiers
//! - [`enums`] -- Broadcast groups
//! - [`telemetry`] -- Aircraft status, cached status entries, flight plans
//! - [`messages`] -- Inbound and outbound named messages

pub mod enums;
pub mod ids;
pub mod messages;
pub mod telemetry;

pub use enums::Group;
pub use ids::{ClientId, ConnectionId};
pub use messages::{InboundMessage, OutboundMessage};
pub use telemetry::{AircraftStatus, FlightPlan, StatusEntry};
