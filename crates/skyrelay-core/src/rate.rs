//! Update-rate negotiation.
//!
//! An outside actor asks for an aircraft, named by callsign, to report at a
//! different cadence. The negotiator resolves the callsign, bounds-checks
//! the rate and sends `ChangeUpdateRate` to that one connection. It never
//! waits for compliance; a client that complies announces it with its own
//! `UpdateRateChanged`, which the hub relays to observers.

use std::sync::Arc;

use skyrelay_types::{ConnectionId, OutboundMessage};
use tracing::info;

use crate::registry::{Registry, RegistryError};

/// Why a rate change was not sent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateError {
    /// Zero or several connections use the callsign.
    #[error("callsign {callsign} is not connected")]
    CallsignNotFound {
        /// The callsign requested.
        callsign: String,
        /// How many connections matched (0 or more than 1).
        matches: usize,
    },

    /// The requested rate is outside the configured bounds.
    #[error("update rate {hz} Hz is outside {min}..={max} Hz")]
    InvalidRate {
        /// Requested updates per second.
        hz: f64,
        /// Lowest accepted rate.
        min: f64,
        /// Highest accepted rate.
        max: f64,
    },

    /// The target was resolved but its queue refused the command.
    #[error("could not deliver rate change: {0}")]
    Delivery(#[source] RegistryError),
}

/// Sends fire-and-forget cadence changes to aircraft by callsign.
#[derive(Debug, Clone)]
pub struct RateNegotiator {
    registry: Arc<Registry>,
    min_hz: f64,
    max_hz: f64,
}

impl RateNegotiator {
    /// Create a negotiator accepting rates in `min_hz..=max_hz`.
    pub const fn new(registry: Arc<Registry>, min_hz: f64, max_hz: f64) -> Self {
        Self {
            registry,
            min_hz,
            max_hz,
        }
    }

    /// Ask the aircraft flying under `callsign` to report at `hz`.
    ///
    /// Returns the connection the command was queued for.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::InvalidRate`] for a rate outside the bounds,
    /// [`RateError::CallsignNotFound`] when the callsign matches no
    /// connection or more than one, and [`RateError::Delivery`] when the
    /// command could not be queued.
    pub fn request_change(&self, callsign: &str, hz: f64) -> Result<ConnectionId, RateError> {
        if !hz.is_finite() || hz < self.min_hz || hz > self.max_hz {
            return Err(RateError::InvalidRate {
                hz,
                min: self.min_hz,
                max: self.max_hz,
            });
        }

        let target = self
            .registry
            .resolve_unique_callsign(callsign)
            .map_err(|err| RateError::CallsignNotFound {
                callsign: callsign.to_owned(),
                matches: err.matches(),
            })?;

        self.registry
            .send_to(target, OutboundMessage::ChangeUpdateRate { hz })
            .map_err(|err| match err {
                RegistryError::NotConnected(_) => RateError::CallsignNotFound {
                    callsign: callsign.to_owned(),
                    matches: 0,
                },
                other => RateError::Delivery(other),
            })?;

        info!(callsign, hz, connection_id = %target, "Requested update rate change");
        Ok(target)
    }
}
