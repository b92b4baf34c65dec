//! Enumeration types shared by the hub and its clients.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A named broadcast scope a connection can join.
///
/// Broadcasts are addressed to groups rather than to individual
/// connections, so a viewer only receives what it subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Group {
    /// Web map viewers. Receive every aircraft.
    Map,
    /// In-simulator map of a pilot client. Receives every aircraft except
    /// the recipient's own.
    ClientMap,
    /// Air traffic control observers. Receive every aircraft and rate-change
    /// confirmations.
    #[serde(rename = "ATC")]
    Atc,
}

impl Group {
    /// All groups, in declaration order.
    pub const ALL: [Self; 3] = [Self::Map, Self::ClientMap, Self::Atc];

    /// Wire name of the group.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Map => "Map",
            Self::ClientMap => "ClientMap",
            Self::Atc => "ATC",
        }
    }

    /// Whether a member of this group should receive updates about its
    /// own aircraft.
    pub const fn includes_own_aircraft(self) -> bool {
        !matches!(self, Self::ClientMap)
    }
}

impl core::fmt::Display for Group {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
