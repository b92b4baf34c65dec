//! Aircraft telemetry and flight plan payloads.
//!
//! [`AircraftStatus`] is what a pilot client sends on every update and what
//! the hub relays to viewers. [`StatusEntry`] is the hub's cached copy,
//! stamped with the time the hub accepted it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Latest telemetry reported by one aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AircraftStatus {
    /// Latitude in decimal degrees, positive north.
    pub latitude: f64,
    /// Longitude in decimal degrees, positive east.
    pub longitude: f64,
    /// Magnetic heading in degrees.
    #[serde(default)]
    pub heading: f64,
    /// True heading in degrees.
    #[serde(default)]
    pub true_heading: f64,
    /// Altitude above mean sea level in feet.
    #[serde(default)]
    pub altitude: f64,
    /// Altitude above ground level in feet.
    #[serde(default)]
    pub altitude_above_ground: f64,
    /// Indicated airspeed in knots.
    #[serde(default)]
    pub indicated_airspeed: f64,
    /// Callsign the pilot is flying under, if set.
    #[serde(default)]
    pub callsign: Option<String>,
}

impl AircraftStatus {
    /// Create a status at a position with every other field zeroed.
    pub const fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            heading: 0.0,
            true_heading: 0.0,
            altitude: 0.0,
            altitude_above_ground: 0.0,
            indicated_airspeed: 0.0,
            callsign: None,
        }
    }

    /// Set the altitude, builder style.
    #[must_use]
    pub const fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    /// Set the callsign, builder style.
    #[must_use]
    pub fn with_callsign(mut self, callsign: impl Into<String>) -> Self {
        self.callsign = Some(callsign.into());
        self
    }

    /// Whether latitude and longitude are finite and within range.
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Cached status of one connection, as held by the status cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StatusEntry {
    /// The telemetry as last reported.
    pub status: AircraftStatus,
    /// When the hub accepted this update.
    pub updated_at: DateTime<Utc>,
}

impl StatusEntry {
    /// Stamp a status with the current time.
    pub fn now(status: AircraftStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
        }
    }
}

/// Flight plan filed in a pilot client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct FlightPlan {
    /// Departure airport identifier.
    pub departure: String,
    /// Arrival airport identifier.
    pub arrival: String,
    /// Route string (waypoints and airways), if filed.
    #[serde(default)]
    pub route: Option<String>,
    /// Planned cruise altitude in feet.
    #[serde(default)]
    pub cruise_altitude: Option<u32>,
}
