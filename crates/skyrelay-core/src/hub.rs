//! The hub façade.
//!
//! [`Hub`] owns every piece of shared state (registry, status cache, both
//! correlation bridges, the rate negotiator and the track recorder) and is
//! the only thing the transport layer talks to. Inbound frames go through
//! [`Hub::dispatch`]; session lifetime goes through [`Hub::connect`] and
//! [`Hub::disconnect`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use skyrelay_geo::{Route, RoutePoint, RouteStore, TrackRecorder};
use skyrelay_types::{
    AircraftStatus, ClientId, ConnectionId, FlightPlan, Group, InboundMessage, OutboundMessage,
    StatusEntry,
};
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, TickObserver, TickReport};
use crate::config::{HubConfig, RelayConfig, RouteConfig};
use crate::correlation::{CorrelationBridge, CorrelationError};
use crate::rate::{RateError, RateNegotiator};
use crate::registry::{ConnectionSender, Registry, RegistryError};
use crate::status_cache::StatusCache;

/// Groups that receive rate-change confirmations.
pub const RATE_OBSERVER_GROUPS: [Group; 2] = [Group::Atc, Group::Map];

/// Why an inbound message was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The registry refused the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The rate change could not be sent.
    #[error(transparent)]
    Rate(#[from] RateError),

    /// The reported position is not a valid coordinate.
    #[error("invalid position {latitude}, {longitude}")]
    InvalidStatus {
        /// Reported latitude.
        latitude: f64,
        /// Reported longitude.
        longitude: f64,
    },

    /// The message requires an identity the connection has not bound.
    #[error("connection {0} must identify first")]
    NotIdentified(ConnectionId),
}

/// What [`Hub::disconnect`] cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectSummary {
    /// Identity the connection was bound to, if any.
    pub client_id: Option<ClientId>,
    /// Whether the registry still held the connection.
    pub was_registered: bool,
    /// Whether a cached status was dropped.
    pub had_status: bool,
    /// Correlated requests failed because this was their target.
    pub failed_requests: usize,
    /// Connections told that the aircraft left.
    pub notified: usize,
    /// Key the simplified route was stored under, if one was stored.
    pub stored_route: Option<String>,
}

/// One broadcastable aircraft, as served to read-only viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftView {
    /// Session the status came from.
    pub connection_id: ConnectionId,
    /// Identity of the client, if bound.
    pub client_id: Option<ClientId>,
    /// Callsign, if known.
    pub callsign: Option<String>,
    /// Cached telemetry and its timestamp.
    #[serde(flatten)]
    pub entry: StatusEntry,
}

/// Shared state of one relay hub.
pub struct Hub {
    config: HubConfig,
    route_config: RouteConfig,
    registry: Arc<Registry>,
    cache: Arc<StatusCache>,
    status_requests: CorrelationBridge<String, AircraftStatus>,
    plan_requests: CorrelationBridge<String, FlightPlan>,
    negotiator: RateNegotiator,
    tracks: TrackRecorder<ConnectionId>,
    routes: Arc<dyn RouteStore>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.registry.len())
            .field("cached", &self.cache.len())
            .field("status_requests", &self.status_requests.in_flight())
            .field("plan_requests", &self.plan_requests.in_flight())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Build a hub from configuration, storing finished routes in `routes`.
    pub fn new(config: &RelayConfig, routes: Arc<dyn RouteStore>) -> Self {
        let registry = Arc::new(Registry::new());
        let timeout = config.hub.request_timeout();
        Self {
            negotiator: RateNegotiator::new(
                Arc::clone(&registry),
                config.hub.min_update_rate_hz,
                config.hub.max_update_rate_hz,
            ),
            registry,
            cache: Arc::new(StatusCache::new()),
            status_requests: CorrelationBridge::new("status", timeout),
            plan_requests: CorrelationBridge::new("flight_plan", timeout),
            tracks: TrackRecorder::new(),
            routes,
            config: config.hub.clone(),
            route_config: config.routes.clone(),
        }
    }

    /// Hub settings in effect.
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The connection registry.
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The status cache.
    pub const fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    /// The route store finished tracks are written to.
    pub fn routes(&self) -> &dyn RouteStore {
        self.routes.as_ref()
    }

    /// A broadcaster over this hub's registry and cache.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            self.config.outbound_groups.clone(),
            self.config.broadcast_interval(),
        )
    }

    /// Register a new session under a fresh id.
    pub fn connect(&self, sender: ConnectionSender) -> ConnectionId {
        let id = ConnectionId::new();
        self.registry.register(id, sender);
        info!(connection_id = %id, connections = self.registry.len(), "Client connected");
        id
    }

    /// Register a session under an id chosen by the transport.
    ///
    /// Returns `false` if the id is already registered.
    pub fn register(&self, id: ConnectionId, sender: ConnectionSender) -> bool {
        self.registry.register(id, sender)
    }

    /// End a session and purge everything derived from it.
    ///
    /// Safe to call more than once; later calls find nothing to clean.
    pub fn disconnect(&self, id: ConnectionId) -> DisconnectSummary {
        let removed = self.registry.unregister(id);
        let client_id = removed.as_ref().and_then(|conn| conn.client_id.clone());
        let had_status = self.cache.remove(id).is_some();
        let failed_requests = self
            .status_requests
            .fail_target(id)
            .saturating_add(self.plan_requests.fail_target(id));

        let notified = client_id.as_ref().map_or(0, |client_id| {
            self.registry.broadcast(
                &self.config.outbound_groups,
                &OutboundMessage::AircraftRemoved {
                    client_id: client_id.clone(),
                },
                None,
            )
        });

        let route_key = client_id
            .as_ref()
            .map_or_else(|| id.to_string(), |client| client.as_str().to_owned());
        let stored_route = self.store_track(id, route_key);

        info!(
            connection_id = %id,
            client_id = client_id.as_ref().map_or("-", ClientId::as_str),
            failed_requests,
            notified,
            route_stored = stored_route.is_some(),
            "Client disconnected"
        );

        DisconnectSummary {
            client_id,
            was_registered: removed.is_some(),
            had_status,
            failed_requests,
            notified,
            stored_route,
        }
    }

    fn store_track(&self, id: ConnectionId, key: String) -> Option<String> {
        let points = self.tracks.finish(&id)?;
        if points.len() < self.route_config.min_points {
            debug!(connection_id = %id, points = points.len(), "Track too short to store");
            return None;
        }
        let recorded = points.len();
        let simplified = Route::new(points)
            .and_then(|route| route.simplified(self.route_config.simplify_tolerance));
        match simplified {
            Ok(route) => {
                debug!(
                    connection_id = %id,
                    key = %key,
                    recorded,
                    kept = route.len(),
                    "Stored simplified route"
                );
                self.routes.put(&key, route);
                Some(key)
            }
            Err(err) => {
                warn!(connection_id = %id, error = %err, "Discarding unusable track");
                None
            }
        }
    }

    /// Apply one inbound message from connection `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the message cannot be applied. The
    /// connection stays open either way.
    pub fn dispatch(&self, id: ConnectionId, message: InboundMessage) -> Result<(), DispatchError> {
        match message {
            InboundMessage::Identify {
                client_id,
                callsign,
            } => self.registry.bind_identity(id, client_id, callsign)?,
            InboundMessage::JoinGroup { group } => {
                self.registry.join_group(id, group)?;
            }
            InboundMessage::LeaveGroup { group } => {
                self.registry.leave_group(id, group)?;
            }
            InboundMessage::UpdateAircraft { status } => self.update_aircraft(id, status)?,
            InboundMessage::StatusReply { key, status } => {
                self.status_requests.resolve_from(&key, id, status);
            }
            InboundMessage::FlightPlanReply { key, plan } => {
                self.plan_requests.resolve_from(&key, id, plan);
            }
            InboundMessage::ChangeUpdateRateByCallsign { callsign, hz } => {
                self.negotiator.request_change(&callsign, hz)?;
            }
            InboundMessage::UpdateRateChanged { hz } => self.relay_rate_changed(id, hz)?,
        }
        Ok(())
    }

    fn update_aircraft(&self, id: ConnectionId, status: AircraftStatus) -> Result<(), DispatchError> {
        if !status.has_valid_position() {
            return Err(DispatchError::InvalidStatus {
                latitude: status.latitude,
                longitude: status.longitude,
            });
        }
        if !self.registry.contains(id) {
            return Err(RegistryError::NotConnected(id).into());
        }
        if let Some(callsign) = status.callsign.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            self.registry.set_callsign(id, callsign)?;
        }

        self.record_live(id, status);
        Ok(())
    }

    /// Write telemetry for `id` into the track recorder and status cache.
    ///
    /// A disconnect can interleave between the liveness check and these
    /// writes, so they are undone if the connection is gone afterwards.
    fn record_live(&self, id: ConnectionId, status: AircraftStatus) {
        let point = RoutePoint {
            latitude: status.latitude,
            longitude: status.longitude,
            altitude: Some(status.altitude),
            timestamp: Some(Utc::now()),
        };
        self.tracks.record(id, point);
        self.cache.upsert(id, status);

        if !self.registry.contains(id) {
            self.tracks.finish(&id);
            self.cache.remove(id);
            debug!(connection_id = %id, "Dropped telemetry that raced a disconnect");
        }
    }

    fn relay_rate_changed(&self, id: ConnectionId, hz: f64) -> Result<(), DispatchError> {
        let info = self.registry.info(id).ok_or(RegistryError::NotConnected(id))?;
        let client_id = info.client_id.ok_or(DispatchError::NotIdentified(id))?;
        let receivers = self.registry.broadcast(
            &RATE_OBSERVER_GROUPS,
            &OutboundMessage::UpdateRateChanged {
                client_id,
                callsign: info.callsign.clone(),
                hz,
            },
            None,
        );
        info!(
            connection_id = %id,
            callsign = info.callsign.as_deref().unwrap_or("-"),
            hz,
            receivers,
            "Update rate changed"
        );
        Ok(())
    }

    /// Key under which requests to `target` are correlated.
    ///
    /// The key names the session, not just the client: a reconnecting
    /// client whose previous session is still registered gets a key of its
    /// own. Identified sessions are keyed `client_id@connection_id`,
    /// unidentified ones by connection id alone.
    pub fn correlation_key(&self, target: ConnectionId) -> Option<String> {
        self.registry.client_id_of(target).map(|client| {
            client.map_or_else(
                || target.to_string(),
                |client| format!("{}@{target}", client.as_str()),
            )
        })
    }

    /// Ask `target` for its current telemetry under correlation `key`.
    ///
    /// Concurrent calls with the same key share one `RequestStatus` message.
    ///
    /// # Errors
    ///
    /// See [`CorrelationBridge::request`].
    pub async fn request_status(
        &self,
        key: String,
        target: ConnectionId,
    ) -> Result<AircraftStatus, CorrelationError> {
        self.status_requests
            .request(key, target, |key| {
                self.send_request(target, OutboundMessage::RequestStatus { key: key.clone() })
            })
            .await
    }

    /// Ask `target` for its filed flight plan under correlation `key`.
    ///
    /// # Errors
    ///
    /// See [`CorrelationBridge::request`].
    pub async fn request_flight_plan(
        &self,
        key: String,
        target: ConnectionId,
    ) -> Result<FlightPlan, CorrelationError> {
        self.plan_requests
            .request(key, target, |key| {
                self.send_request(target, OutboundMessage::RequestFlightPlan { key: key.clone() })
            })
            .await
    }

    fn send_request(&self, target: ConnectionId, message: OutboundMessage) -> Result<(), CorrelationError> {
        self.registry
            .send_to(target, message)
            .map_err(|err| CorrelationError::SendFailed {
                reason: err.to_string(),
            })
    }

    /// Ask the aircraft flying under `callsign` to report at `hz`.
    ///
    /// # Errors
    ///
    /// See [`RateNegotiator::request_change`].
    pub fn change_update_rate(&self, callsign: &str, hz: f64) -> Result<ConnectionId, RateError> {
        self.negotiator.request_change(callsign, hz)
    }

    /// Reap correlated requests past their deadline on both bridges.
    pub fn purge_expired(&self) -> usize {
        self.status_requests
            .purge_expired()
            .saturating_add(self.plan_requests.purge_expired())
    }

    /// Requests in flight across both bridges.
    pub fn requests_in_flight(&self) -> usize {
        self.status_requests
            .in_flight()
            .saturating_add(self.plan_requests.in_flight())
    }

    /// Every cached aircraft with its identity, ordered by connection.
    pub fn aircraft(&self) -> Vec<AircraftView> {
        self.cache
            .snapshot()
            .into_iter()
            .filter_map(|(connection_id, entry)| {
                let info = self.registry.info(connection_id)?;
                Some(AircraftView {
                    connection_id,
                    client_id: info.client_id,
                    callsign: info.callsign,
                    entry,
                })
            })
            .collect()
    }
}

/// Tick observer that keeps the correlation tables tidy on the broadcast
/// cadence.
pub struct HousekeepingObserver {
    hub: Arc<Hub>,
}

impl HousekeepingObserver {
    /// Observe ticks on behalf of `hub`.
    pub const fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

impl TickObserver for HousekeepingObserver {
    fn on_tick(&mut self, report: &TickReport) {
        let purged = self.hub.purge_expired();
        if purged > 0 || report.pruned > 0 {
            debug!(
                tick = report.tick,
                pruned = report.pruned,
                purged,
                "Housekeeping"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use skyrelay_geo::MemoryRouteStore;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    fn hub_with_store() -> (Hub, Arc<MemoryRouteStore>) {
        let store = Arc::new(MemoryRouteStore::new());
        let hub = Hub::new(&RelayConfig::default(), Arc::clone(&store) as Arc<dyn RouteStore>);
        (hub, store)
    }

    fn open(hub: &Hub) -> (ConnectionId, UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.connect(tx), rx)
    }

    fn identify(hub: &Hub, id: ConnectionId, client: &str, callsign: &str) {
        hub.dispatch(
            id,
            InboundMessage::Identify {
                client_id: ClientId::new(client),
                callsign: Some(callsign.to_owned()),
            },
        )
        .unwrap();
    }

    #[test]
    fn update_aircraft_fills_cache_and_callsign() {
        let (hub, _) = hub_with_store();
        let (id, _rx) = open(&hub);
        hub.dispatch(
            id,
            InboundMessage::UpdateAircraft {
                status: AircraftStatus::at(10.0, 20.0).with_callsign("ALPHA1"),
            },
        )
        .unwrap();

        assert!(hub.cache().get(id).is_some());
        assert_eq!(hub.registry().resolve_by_callsign("alpha1"), Some(id));
    }

    #[test]
    fn update_aircraft_rejects_invalid_position() {
        let (hub, _) = hub_with_store();
        let (id, _rx) = open(&hub);
        let result = hub.dispatch(
            id,
            InboundMessage::UpdateAircraft {
                status: AircraftStatus::at(120.0, 0.0),
            },
        );
        assert!(matches!(result, Err(DispatchError::InvalidStatus { .. })));
        assert!(hub.cache().is_empty());
    }

    #[test]
    fn disconnect_notifies_viewers_and_stores_route() {
        let (hub, store) = hub_with_store();
        let (pilot, _pilot_rx) = open(&hub);
        let (viewer, mut viewer_rx) = open(&hub);
        identify(&hub, pilot, "pilot-1", "ALPHA1");
        hub.dispatch(viewer, InboundMessage::JoinGroup { group: Group::Map })
            .unwrap();
        for lon in [0.0, 0.5, 1.0] {
            hub.dispatch(
                pilot,
                InboundMessage::UpdateAircraft {
                    status: AircraftStatus::at(0.0, lon),
                },
            )
            .unwrap();
        }

        let summary = hub.disconnect(pilot);
        assert!(summary.was_registered);
        assert!(summary.had_status);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.stored_route.as_deref(), Some("pilot-1"));
        assert_eq!(
            viewer_rx.try_recv().unwrap(),
            OutboundMessage::AircraftRemoved {
                client_id: ClientId::new("pilot-1")
            }
        );

        // Collinear track collapses to its endpoints.
        let route = store.get("pilot-1").unwrap();
        assert_eq!(route.len(), 2);
        assert!(hub.cache().get(pilot).is_none());

        let again = hub.disconnect(pilot);
        assert!(!again.was_registered);
        assert_eq!(again.stored_route, None);
    }

    #[test]
    fn short_tracks_are_not_stored() {
        let (hub, store) = hub_with_store();
        let (pilot, _rx) = open(&hub);
        hub.dispatch(
            pilot,
            InboundMessage::UpdateAircraft {
                status: AircraftStatus::at(1.0, 1.0),
            },
        )
        .unwrap();
        assert_eq!(hub.disconnect(pilot).stored_route, None);
        assert!(store.is_empty());
    }

    #[test]
    fn rate_confirmation_reaches_observers_only() {
        let (hub, _) = hub_with_store();
        let (pilot, _pilot_rx) = open(&hub);
        let (atc, mut atc_rx) = open(&hub);
        let (client_map, mut client_map_rx) = open(&hub);
        identify(&hub, pilot, "pilot-1", "ALPHA1");
        hub.dispatch(atc, InboundMessage::JoinGroup { group: Group::Atc })
            .unwrap();
        hub.dispatch(
            client_map,
            InboundMessage::JoinGroup {
                group: Group::ClientMap,
            },
        )
        .unwrap();

        hub.dispatch(pilot, InboundMessage::UpdateRateChanged { hz: 2.0 })
            .unwrap();
        assert_eq!(
            atc_rx.try_recv().unwrap(),
            OutboundMessage::UpdateRateChanged {
                client_id: ClientId::new("pilot-1"),
                callsign: Some(String::from("ALPHA1")),
                hz: 2.0,
            }
        );
        assert!(client_map_rx.try_recv().is_err());
    }

    #[test]
    fn rate_confirmation_requires_identity() {
        let (hub, _) = hub_with_store();
        let (anon, _rx) = open(&hub);
        assert_eq!(
            hub.dispatch(anon, InboundMessage::UpdateRateChanged { hz: 1.0 }),
            Err(DispatchError::NotIdentified(anon))
        );
    }

    #[test]
    fn change_rate_by_callsign_reaches_target() {
        let (hub, _) = hub_with_store();
        let (pilot, mut pilot_rx) = open(&hub);
        let (atc, _atc_rx) = open(&hub);
        identify(&hub, pilot, "pilot-1", "ALPHA1");
        hub.dispatch(
            atc,
            InboundMessage::ChangeUpdateRateByCallsign {
                callsign: String::from("alpha1"),
                hz: 4.0,
            },
        )
        .unwrap();
        assert_eq!(
            pilot_rx.try_recv().unwrap(),
            OutboundMessage::ChangeUpdateRate { hz: 4.0 }
        );
    }

    #[test]
    fn telemetry_racing_a_disconnect_leaves_nothing_behind() {
        let (hub, store) = hub_with_store();
        let (id, _rx) = open(&hub);
        identify(&hub, id, "pilot-1", "ALPHA1");
        hub.disconnect(id);

        hub.record_live(id, AircraftStatus::at(10.0, 20.0));
        assert_eq!(hub.tracks.active(), 0);
        assert!(hub.cache.get(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn correlation_key_names_client_and_session() {
        let (hub, _) = hub_with_store();
        let (id, _rx) = open(&hub);
        assert_eq!(hub.correlation_key(id), Some(id.to_string()));
        identify(&hub, id, "pilot-1", "ALPHA1");
        assert_eq!(hub.correlation_key(id), Some(format!("pilot-1@{id}")));
        hub.disconnect(id);
        assert_eq!(hub.correlation_key(id), None);
    }

    #[test]
    fn aircraft_view_skips_departed_connections() {
        let (hub, _) = hub_with_store();
        let (id, _rx) = open(&hub);
        identify(&hub, id, "pilot-1", "ALPHA1");
        hub.cache().upsert(id, AircraftStatus::at(1.0, 2.0));
        hub.cache().upsert(ConnectionId::new(), AircraftStatus::at(3.0, 4.0));

        let views = hub.aircraft();
        assert_eq!(views.len(), 1);
        assert_eq!(views.first().unwrap().callsign.as_deref(), Some("ALPHA1"));
    }
}
