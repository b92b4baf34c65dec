//! Chat-bridge command boundary.
//!
//! The chat platform's own transport lives outside this workspace. It
//! forwards each message that looks like a command to
//! `POST /api/bridge/command` and posts the returned text back to the
//! channel. Three commands are understood, case-insensitively:
//!
//! | Command | Effect |
//! |---------|--------|
//! | `!finfo <callsign>` | Ask the aircraft for its status and summarise it |
//! | `!fplan <callsign>` | Ask the aircraft for its filed flight plan |
//! | `!rate <callsign> <hz>` | Ask the aircraft to report at a new cadence |
//!
//! Anything else gets [`USAGE`]. A callsign that does not resolve, a target
//! that disconnects and a request that times out all read the same to the
//! user: the aircraft is not connected.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use skyrelay_core::RateError;
use skyrelay_types::{AircraftStatus, FlightPlan};
use tracing::{debug, info};

use crate::state::AppState;

/// Reply sent for input that is not a recognised command.
pub const USAGE: &str =
    "Usage: `!finfo <callsign>`, `!fplan <callsign>` or `!rate <callsign> <hz>`";

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// `!finfo <callsign>`
    FlightInfo {
        /// Callsign to look up.
        callsign: String,
    },
    /// `!fplan <callsign>`
    FlightPlan {
        /// Callsign to look up.
        callsign: String,
    },
    /// `!rate <callsign> <hz>`
    Rate {
        /// Callsign of the aircraft.
        callsign: String,
        /// Requested updates per second.
        hz: f64,
    },
}

impl BridgeCommand {
    /// Parse a chat message. Returns `None` for anything but a well-formed
    /// command.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let command = words.next()?.to_lowercase();
        let callsign = words.next()?.to_owned();

        let parsed = match command.as_str() {
            "!finfo" => Self::FlightInfo { callsign },
            "!fplan" => Self::FlightPlan { callsign },
            "!rate" => {
                let hz = words.next()?.parse::<f64>().ok()?;
                Self::Rate { callsign, hz }
            }
            _ => return None,
        };

        // Trailing words mean the user typed something else.
        if words.next().is_some() {
            return None;
        }
        Some(parsed)
    }

    /// The callsign the command targets.
    pub fn callsign(&self) -> &str {
        match self {
            Self::FlightInfo { callsign }
            | Self::FlightPlan { callsign }
            | Self::Rate { callsign, .. } => callsign,
        }
    }
}

/// Body of `POST /api/bridge/command`.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeRequest {
    /// The raw chat message.
    pub text: String,
    /// Chat-platform identity of the person who typed it.
    #[serde(default)]
    pub requester: Option<String>,
}

/// Text to post back to the chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeReply {
    /// The reply text.
    pub reply: String,
}

/// Reply used for every "no usable target" outcome.
pub fn not_connected(callsign: &str) -> String {
    format!("`{callsign}` is not connected")
}

/// Human-readable summary of an aircraft's telemetry.
pub fn format_status(callsign: &str, status: &AircraftStatus, place: Option<&str>) -> String {
    let mut out = format!(
        "**{callsign}**\nPosition: {:.4}, {:.4}",
        status.latitude, status.longitude
    );
    if let Some(place) = place {
        let _ = write!(out, " (near {place})");
    }
    let _ = write!(
        out,
        "\nAltitude: {:.0} ft (AGL {:.0} ft)\nHeading: {:.0}° (true {:.0}°)\nAirspeed: {:.0} kt IAS",
        status.altitude,
        status.altitude_above_ground,
        status.heading,
        status.true_heading,
        status.indicated_airspeed,
    );
    out
}

/// Human-readable summary of a filed flight plan.
pub fn format_plan(callsign: &str, plan: &FlightPlan) -> String {
    let mut out = format!("**{callsign}**: {} → {}", plan.departure, plan.arrival);
    if let Some(cruise) = plan.cruise_altitude {
        let _ = write!(out, " at {cruise} ft");
    }
    if let Some(route) = plan.route.as_deref().filter(|r| !r.trim().is_empty()) {
        let _ = write!(out, "\nRoute: {route}");
    }
    out
}

/// Run one chat command against the hub and produce the reply text.
pub async fn execute(state: &AppState, request: &BridgeRequest) -> BridgeReply {
    let requester = request.requester.as_deref().unwrap_or("-");
    let Some(command) = BridgeCommand::parse(&request.text) else {
        debug!(requester, text = %request.text, "Unrecognised bridge command");
        return BridgeReply {
            reply: USAGE.to_owned(),
        };
    };
    info!(requester, ?command, "Bridge command");

    let reply = match &command {
        BridgeCommand::FlightInfo { callsign } => flight_info(state, callsign).await,
        BridgeCommand::FlightPlan { callsign } => flight_plan(state, callsign).await,
        BridgeCommand::Rate { callsign, hz } => change_rate(state, callsign, *hz),
    };
    BridgeReply { reply }
}

async fn flight_info(state: &AppState, callsign: &str) -> String {
    let hub = &state.hub;
    let Some((target, key)) = hub
        .registry()
        .resolve_by_callsign(callsign)
        .and_then(|target| hub.correlation_key(target).map(|key| (target, key)))
    else {
        return not_connected(callsign);
    };

    match hub.request_status(key, target).await {
        Ok(status) => {
            let place = state
                .geocoder
                .place_name(status.latitude, status.longitude)
                .await;
            let shown = status.callsign.as_deref().unwrap_or(callsign);
            format_status(shown, &status, place.as_deref())
        }
        Err(e) => {
            debug!(callsign, error = %e, "Status request failed");
            not_connected(callsign)
        }
    }
}

async fn flight_plan(state: &AppState, callsign: &str) -> String {
    let hub = &state.hub;
    let Some((target, key)) = hub
        .registry()
        .resolve_by_callsign(callsign)
        .and_then(|target| hub.correlation_key(target).map(|key| (target, key)))
    else {
        return not_connected(callsign);
    };

    match hub.request_flight_plan(key, target).await {
        Ok(plan) => format_plan(callsign, &plan),
        Err(e) => {
            debug!(callsign, error = %e, "Flight plan request failed");
            not_connected(callsign)
        }
    }
}

fn change_rate(state: &AppState, callsign: &str, hz: f64) -> String {
    match state.hub.change_update_rate(callsign, hz) {
        Ok(_) => format!("Asked `{callsign}` to report at {hz} Hz"),
        Err(RateError::InvalidRate { min, max, .. }) => {
            format!("Update rate must be between {min} and {max} Hz")
        }
        Err(e) => {
            debug!(callsign, error = %e, "Rate change failed");
            not_connected(callsign)
        }
    }
}
