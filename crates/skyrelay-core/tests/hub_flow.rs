//! End-to-end flows through the hub: a pilot connection answering
//! correlated requests from a bridge while other callers pile on.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use skyrelay_core::{CorrelationError, Hub, RelayConfig};
use skyrelay_geo::{MemoryRouteStore, RouteStore};
use skyrelay_types::{
    AircraftStatus, ClientId, ConnectionId, FlightPlan, Group, InboundMessage, OutboundMessage,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn hub() -> Arc<Hub> {
    let store: Arc<dyn RouteStore> = Arc::new(MemoryRouteStore::new());
    Arc::new(Hub::new(&RelayConfig::default(), store))
}

fn open(hub: &Hub) -> (ConnectionId, UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (hub.connect(tx), rx)
}

/// Wait until the pilot has been asked, yielding to the spawned callers.
async fn next_request(rx: &mut UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    rx.recv().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrent_status_requests_share_one_answer() {
    let hub = hub();
    let (pilot, mut pilot_rx) = open(&hub);
    let (_bridge, _bridge_rx) = open(&hub);
    hub.dispatch(
        pilot,
        InboundMessage::Identify {
            client_id: ClientId::new("pilot-a"),
            callsign: Some(String::from("ALPHA1")),
        },
    )
    .unwrap();
    let target = hub.registry().resolve_by_callsign("ALPHA1").unwrap();
    assert_eq!(target, pilot);

    let first = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.request_status(String::from("userX"), target).await })
    };
    assert_eq!(
        next_request(&mut pilot_rx).await,
        OutboundMessage::RequestStatus {
            key: String::from("userX")
        }
    );

    let second = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.request_status(String::from("userX"), target).await })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }

    let answer = AircraftStatus::at(10.0, 20.0).with_altitude(5_000.0);
    hub.dispatch(
        pilot,
        InboundMessage::StatusReply {
            key: String::from("userX"),
            status: answer.clone(),
        },
    )
    .unwrap();

    assert_eq!(first.await.unwrap(), Ok(answer.clone()));
    assert_eq!(second.await.unwrap(), Ok(answer));
    // The second caller joined; no second request went out.
    assert!(pilot_rx.try_recv().is_err());
    assert_eq!(hub.requests_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_fails_outstanding_requests() {
    let hub = hub();
    let (pilot, mut pilot_rx) = open(&hub);

    let waiter = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.request_flight_plan(String::from("userY"), pilot).await })
    };
    assert!(matches!(
        next_request(&mut pilot_rx).await,
        OutboundMessage::RequestFlightPlan { .. }
    ));

    let summary = hub.disconnect(pilot);
    assert_eq!(summary.failed_requests, 1);
    assert_eq!(
        waiter.await.unwrap(),
        Err(CorrelationError::TargetDisconnected { target: pilot })
    );
}

#[tokio::test(start_paused = true)]
async fn reconnected_client_is_not_shadowed_by_its_old_session() {
    let hub = hub();
    let (old, mut old_rx) = open(&hub);
    let (new, mut new_rx) = open(&hub);
    for id in [old, new] {
        hub.dispatch(
            id,
            InboundMessage::Identify {
                client_id: ClientId::new("pilot-a"),
                callsign: Some(String::from("ALPHA1")),
            },
        )
        .unwrap();
    }
    let old_key = hub.correlation_key(old).unwrap();
    let new_key = hub.correlation_key(new).unwrap();
    assert_ne!(old_key, new_key);

    let stale = {
        let hub = Arc::clone(&hub);
        let key = old_key.clone();
        tokio::spawn(async move { hub.request_status(key, old).await })
    };
    assert!(matches!(
        next_request(&mut old_rx).await,
        OutboundMessage::RequestStatus { .. }
    ));

    let fresh = {
        let hub = Arc::clone(&hub);
        let key = new_key.clone();
        tokio::spawn(async move { hub.request_status(key, new).await })
    };
    assert_eq!(
        next_request(&mut new_rx).await,
        OutboundMessage::RequestStatus { key: new_key.clone() }
    );

    let answer = AircraftStatus::at(51.5, -0.1);
    hub.dispatch(
        new,
        InboundMessage::StatusReply {
            key: new_key,
            status: answer.clone(),
        },
    )
    .unwrap();
    assert_eq!(fresh.await.unwrap(), Ok(answer));
    assert_eq!(hub.requests_in_flight(), 1);

    hub.disconnect(old);
    assert_eq!(
        stale.await.unwrap(),
        Err(CorrelationError::TargetDisconnected { target: old })
    );
}

#[tokio::test(start_paused = true)]
async fn silent_target_times_out() {
    let hub = hub();
    let (pilot, _pilot_rx) = open(&hub);
    let outcome = hub.request_status(String::from("userZ"), pilot).await;
    assert_eq!(outcome, Err(CorrelationError::Timeout { after_ms: 10_000 }));
    assert_eq!(hub.requests_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn request_to_departed_target_fails_fast() {
    let hub = hub();
    let ghost = ConnectionId::new();
    let outcome = hub.request_status(String::from("userZ"), ghost).await;
    assert!(matches!(outcome, Err(CorrelationError::SendFailed { .. })));
}

#[tokio::test]
async fn unsolicited_reply_is_ignored() {
    let hub = hub();
    let (pilot, _pilot_rx) = open(&hub);
    hub.dispatch(
        pilot,
        InboundMessage::FlightPlanReply {
            key: String::from("nobody"),
            plan: FlightPlan {
                departure: String::from("EGLL"),
                arrival: String::from("KJFK"),
                route: None,
                cruise_altitude: Some(37_000),
            },
        },
    )
    .unwrap();
    assert_eq!(hub.requests_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn broadcaster_relays_telemetry_and_prunes_departures() {
    let hub = hub();
    let (pilot, _pilot_rx) = open(&hub);
    let (viewer, mut viewer_rx) = open(&hub);
    hub.dispatch(
        pilot,
        InboundMessage::Identify {
            client_id: ClientId::new("pilot-a"),
            callsign: None,
        },
    )
    .unwrap();
    hub.dispatch(viewer, InboundMessage::JoinGroup { group: Group::Map })
        .unwrap();
    hub.dispatch(
        pilot,
        InboundMessage::UpdateAircraft {
            status: AircraftStatus::at(51.47, -0.45),
        },
    )
    .unwrap();

    let broadcaster = hub.broadcaster();
    assert_eq!(broadcaster.interval(), Duration::from_millis(2_000));
    let report = broadcaster.tick(1);
    assert_eq!(report.emitted, 1);
    assert!(matches!(
        viewer_rx.try_recv().unwrap(),
        OutboundMessage::AircraftUpdated { .. }
    ));

    // A disconnect that races ahead of cleanup leaves a stale entry.
    hub.registry().unregister(pilot);
    let report = broadcaster.tick(2);
    assert_eq!(report.pruned, 1);
    assert!(hub.cache().is_empty());
}
