//! Periodic fan-out of cached telemetry.
//!
//! This module provides [`Broadcaster`], the single background loop that
//! turns the [`StatusCache`] into `AircraftUpdated` events:
//!
//! - **Fixed cadence**: one tick per `hub.broadcast_interval_ms`, however
//!   fast clients report.
//! - **Stale-entry pruning**: a cache entry whose connection no longer
//!   resolves in the registry is removed, not broadcast.
//! - **Cooperative shutdown**: the loop stops at the next await point after
//!   its [`CancellationToken`] fires, so within one period.
//!
//! Each entry is emitted independently; a tick interrupted halfway leaves
//! no inconsistent state behind.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use skyrelay_types::{Group, OutboundMessage};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::Registry;
use crate::status_cache::StatusCache;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Cache entries in the snapshot.
    pub entries: usize,
    /// `AircraftUpdated` events emitted (one per broadcast aircraft).
    pub emitted: usize,
    /// Stale entries removed because their connection was gone.
    pub pruned: usize,
    /// Entries skipped because their connection has not identified yet.
    pub unidentified: usize,
    /// Total messages queued across all receivers.
    pub deliveries: usize,
}

/// Callback invoked after each tick completes.
///
/// Implementations can use this for housekeeping that should run on the
/// broadcast cadence, such as reaping expired correlated requests.
pub trait TickObserver: Send {
    /// Called after a tick completes.
    fn on_tick(&mut self, report: &TickReport);
}

/// A no-op tick observer for testing.
pub struct NoOpObserver;

impl TickObserver for NoOpObserver {
    fn on_tick(&mut self, _report: &TickReport) {}
}

/// Reads the status cache on a fixed period and fans each entry out to the
/// outbound groups.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    cache: Arc<StatusCache>,
    groups: Vec<Group>,
    interval: Duration,
}

impl Broadcaster {
    /// Create a broadcaster emitting to `groups` every `interval`.
    pub const fn new(
        registry: Arc<Registry>,
        cache: Arc<StatusCache>,
        groups: Vec<Group>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            groups,
            interval,
        }
    }

    /// The broadcast period.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one fan-out cycle.
    ///
    /// The snapshot is taken up front; entries upserted during the tick
    /// are picked up by the next one.
    pub fn tick(&self, tick: u64) -> TickReport {
        let snapshot = self.cache.snapshot();
        let mut report = TickReport {
            tick,
            entries: snapshot.len(),
            ..TickReport::default()
        };

        for (connection_id, entry) in snapshot {
            match self.registry.client_id_of(connection_id) {
                None => {
                    self.cache.remove(connection_id);
                    report.pruned = report.pruned.saturating_add(1);
                    debug!(connection_id = %connection_id, "Pruned status of departed connection");
                }
                Some(None) => {
                    report.unidentified = report.unidentified.saturating_add(1);
                }
                Some(Some(client_id)) => {
                    let message = OutboundMessage::AircraftUpdated {
                        client_id,
                        status: entry.status,
                    };
                    let receivers =
                        self.registry
                            .broadcast(&self.groups, &message, Some(connection_id));
                    report.emitted = report.emitted.saturating_add(1);
                    report.deliveries = report.deliveries.saturating_add(receivers);
                }
            }
        }

        debug!(
            tick = report.tick,
            entries = report.entries,
            emitted = report.emitted,
            pruned = report.pruned,
            deliveries = report.deliveries,
            "Broadcast tick"
        );
        report
    }

    /// Tick on the configured period until `cancel` fires.
    ///
    /// Returns the number of ticks executed.
    pub async fn run(&self, cancel: CancellationToken, observer: &mut dyn TickObserver) -> u64 {
        let start = tokio::time::Instant::now()
            .checked_add(self.interval)
            .unwrap_or_else(tokio::time::Instant::now);
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut total_ticks: u64 = 0;
        info!(
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            groups = ?self.groups,
            "Broadcaster starting"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    total_ticks = total_ticks.saturating_add(1);
                    let report = self.tick(total_ticks);
                    observer.on_tick(&report);
                }
            }
        }

        info!(total_ticks, "Broadcaster stopped");
        total_ticks
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use skyrelay_types::{AircraftStatus, ClientId, ConnectionId};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    struct Fixture {
        registry: Arc<Registry>,
        cache: Arc<StatusCache>,
        broadcaster: Broadcaster,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let cache = Arc::new(StatusCache::new());
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Group::ALL.to_vec(),
            Duration::from_millis(2_000),
        );
        Fixture {
            registry,
            cache,
            broadcaster,
        }
    }

    fn join(
        registry: &Registry,
        client: Option<&str>,
        group: Group,
    ) -> (ConnectionId, UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        registry.register(id, tx);
        if let Some(client) = client {
            registry.bind_identity(id, ClientId::new(client), None).unwrap();
        }
        registry.join_group(id, group).unwrap();
        (id, rx)
    }

    #[test]
    fn tick_emits_latest_status_to_viewers() {
        let f = fixture();
        let (pilot, mut pilot_rx) = join(&f.registry, Some("pilot"), Group::ClientMap);
        let (_viewer, mut viewer_rx) = join(&f.registry, None, Group::Map);

        f.cache.upsert(pilot, AircraftStatus::at(1.0, 1.0));
        f.cache.upsert(pilot, AircraftStatus::at(2.0, 2.0));
        let report = f.broadcaster.tick(1);

        assert_eq!(report.emitted, 1);
        assert_eq!(report.deliveries, 1);
        assert_eq!(
            viewer_rx.try_recv().unwrap(),
            OutboundMessage::AircraftUpdated {
                client_id: ClientId::new("pilot"),
                status: AircraftStatus::at(2.0, 2.0),
            }
        );
        assert!(viewer_rx.try_recv().is_err());
        // ClientMap members never see their own aircraft.
        assert!(pilot_rx.try_recv().is_err());
    }

    #[test]
    fn tick_prunes_entries_of_departed_connections() {
        let f = fixture();
        let ghost = ConnectionId::new();
        f.cache.upsert(ghost, AircraftStatus::at(0.0, 0.0));

        let report = f.broadcaster.tick(1);
        assert_eq!(report.pruned, 1);
        assert_eq!(report.emitted, 0);
        assert!(f.cache.get(ghost).is_none());
    }

    #[test]
    fn tick_holds_back_unidentified_connections() {
        let f = fixture();
        let (anon, _rx) = join(&f.registry, None, Group::Map);
        f.cache.upsert(anon, AircraftStatus::at(0.0, 0.0));

        let report = f.broadcaster.tick(1);
        assert_eq!(report.unidentified, 1);
        assert!(f.cache.get(anon).is_some());
    }

    struct Recording(Vec<TickReport>);

    impl TickObserver for Recording {
        fn on_tick(&mut self, report: &TickReport) {
            self.0.push(*report);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_period_and_stops_on_cancel() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(7_000)).await;
            stopper.cancel();
        });

        let mut observer = Recording(Vec::new());
        let total = f.broadcaster.run(cancel, &mut observer).await;

        // Ticks at 2s, 4s and 6s; cancelled at 7s.
        assert_eq!(total, 3);
        let ticks: Vec<u64> = observer.0.iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_immediately_when_already_cancelled() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(f.broadcaster.run(cancel, &mut NoOpObserver).await, 0);
    }
}
