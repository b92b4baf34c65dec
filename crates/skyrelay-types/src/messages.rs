//! Named messages exchanged over a connection.
//!
//! Both directions are JSON objects tagged by a `type` field, e.g.
//! `{"type": "UpdateAircraft", "status": {...}}`. The transport layer
//! decodes [`InboundMessage`] from client frames and encodes
//! [`OutboundMessage`] for delivery to one connection or a group.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::Group;
use crate::ids::ClientId;
use crate::telemetry::{AircraftStatus, FlightPlan};

/// A message received from a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type")]
#[ts(export, export_to = "bindings/")]
pub enum InboundMessage {
    /// Bind a stable identity and callsign to the sending connection.
    Identify {
        /// Stable identity of the client.
        client_id: ClientId,
        /// Callsign the pilot is flying under.
        #[serde(default)]
        callsign: Option<String>,
    },
    /// Subscribe the sending connection to a broadcast group.
    JoinGroup {
        /// Group to join.
        group: Group,
    },
    /// Unsubscribe the sending connection from a broadcast group.
    LeaveGroup {
        /// Group to leave.
        group: Group,
    },
    /// Latest telemetry of the sending aircraft.
    UpdateAircraft {
        /// The telemetry.
        status: AircraftStatus,
    },
    /// Answer to a [`OutboundMessage::RequestStatus`].
    StatusReply {
        /// Correlation key copied from the request.
        key: String,
        /// The sender's current telemetry.
        status: AircraftStatus,
    },
    /// Answer to a [`OutboundMessage::RequestFlightPlan`].
    FlightPlanReply {
        /// Correlation key copied from the request.
        key: String,
        /// The sender's filed flight plan.
        plan: FlightPlan,
    },
    /// Ask the hub to change another aircraft's update cadence.
    ChangeUpdateRateByCallsign {
        /// Callsign of the target aircraft.
        callsign: String,
        /// Desired updates per second.
        hz: f64,
    },
    /// The sending client now reports at a new cadence.
    UpdateRateChanged {
        /// Updates per second now in effect.
        hz: f64,
    },
}

/// A message the hub sends to one connection or a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type")]
#[ts(export, export_to = "bindings/")]
pub enum OutboundMessage {
    /// Periodic position broadcast for one aircraft.
    AircraftUpdated {
        /// Identity of the aircraft's client.
        client_id: ClientId,
        /// Latest telemetry.
        status: AircraftStatus,
    },
    /// The aircraft's connection ended; viewers should drop its marker.
    AircraftRemoved {
        /// Identity of the departed client.
        client_id: ClientId,
    },
    /// Ask the recipient for its current telemetry.
    RequestStatus {
        /// Correlation key to echo in the reply.
        key: String,
    },
    /// Ask the recipient for its filed flight plan.
    RequestFlightPlan {
        /// Correlation key to echo in the reply.
        key: String,
    },
    /// Ask the recipient to report at a different cadence.
    ChangeUpdateRate {
        /// Desired updates per second.
        hz: f64,
    },
    /// Confirmation that an aircraft changed its cadence.
    UpdateRateChanged {
        /// Identity of the aircraft's client.
        client_id: ClientId,
        /// Callsign of the aircraft, if known.
        callsign: Option<String>,
        /// Updates per second now in effect.
        hz: f64,
    },
    /// A frame from the recipient could not be processed.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl OutboundMessage {
    /// Wire name of the message, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AircraftUpdated { .. } => "AircraftUpdated",
            Self::AircraftRemoved { .. } => "AircraftRemoved",
            Self::RequestStatus { .. } => "RequestStatus",
            Self::RequestFlightPlan { .. } => "RequestFlightPlan",
            Self::ChangeUpdateRate { .. } => "ChangeUpdateRate",
            Self::UpdateRateChanged { .. } => "UpdateRateChanged",
            Self::Error { .. } => "Error",
        }
    }
}
