//! In-progress track recording.

use std::hash::Hash;

use dashmap::DashMap;

use crate::route::RoutePoint;

/// Accumulates the positions each live aircraft reports until its flight
/// segment ends.
///
/// Points that repeat the previous position, fall outside the coordinate
/// range, or go back in time are dropped on entry, so a finished track
/// always forms a valid [`Route`](crate::Route).
#[derive(Debug)]
pub struct TrackRecorder<K: Eq + Hash> {
    tracks: DashMap<K, Vec<RoutePoint>>,
}

impl<K: Eq + Hash> Default for TrackRecorder<K> {
    fn default() -> Self {
        Self {
            tracks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TrackRecorder<K> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point to the track for `key`. Returns whether it was kept.
    pub fn record(&self, key: K, point: RoutePoint) -> bool {
        if !point.in_range() {
            return false;
        }
        let mut track = self.tracks.entry(key).or_default();
        if let Some(last) = track.last() {
            let backwards = matches!(
                (last.timestamp, point.timestamp),
                (Some(prev), Some(next)) if next < prev
            );
            if last.same_position(&point) || backwards {
                return false;
            }
        }
        track.push(point);
        true
    }

    /// Number of points recorded so far for `key`.
    pub fn track_len(&self, key: &K) -> usize {
        self.tracks.get(key).map_or(0, |track| track.len())
    }

    /// End the track for `key`, returning its points.
    pub fn finish(&self, key: &K) -> Option<Vec<RoutePoint>> {
        self.tracks.remove(key).map(|(_, track)| track)
    }

    /// Number of tracks in progress.
    pub fn active(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn skips_consecutive_duplicates() {
        let recorder = TrackRecorder::new();
        assert!(recorder.record(1_u8, RoutePoint::new(1.0, 1.0)));
        assert!(!recorder.record(1, RoutePoint::new(1.0, 1.0)));
        assert!(recorder.record(1, RoutePoint::new(1.0, 2.0)));
        assert!(recorder.record(1, RoutePoint::new(1.0, 1.0)));
        assert_eq!(recorder.track_len(&1), 3);
    }

    #[test]
    fn rejects_out_of_range_and_backwards_points() {
        let recorder = TrackRecorder::new();
        let now = Utc::now();
        let mut first = RoutePoint::new(0.0, 0.0);
        first.timestamp = Some(now);
        let mut earlier = RoutePoint::new(0.0, 1.0);
        earlier.timestamp = Some(now - Duration::seconds(5));

        assert!(!recorder.record("a", RoutePoint::new(91.0, 0.0)));
        assert!(recorder.record("a", first));
        assert!(!recorder.record("a", earlier));
        assert_eq!(recorder.track_len(&"a"), 1);
    }

    #[test]
    fn finish_hands_back_track_once() {
        let recorder = TrackRecorder::new();
        recorder.record("a", RoutePoint::new(0.0, 0.0));
        recorder.record("a", RoutePoint::new(0.0, 1.0));
        assert_eq!(recorder.active(), 1);
        assert_eq!(recorder.finish(&"a").map(|t| t.len()), Some(2));
        assert!(recorder.finish(&"a").is_none());
        assert_eq!(recorder.active(), 0);
    }
}
