//! Recorded flight routes.
//!
//! A [`Route`] is an ordered, time-ascending sequence of [`RoutePoint`]s
//! captured for one flight segment. Routes are immutable once built;
//! simplification produces a new, shorter route.
//!
//! # Text format
//!
//! One point per line, fields separated by `;`:
//!
//! ```text
//! latitude;longitude[;altitude[;rfc3339-timestamp]]
//! ```
//!
//! Numbers always use `.` as the decimal separator. A value such as
//! `51,5` is rejected rather than read as fifty-one point five, so a file
//! written on one machine can never be silently misread on another.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GeoError;
use crate::simplify::{self, Planar};

/// One recorded position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude above mean sea level in feet.
    #[serde(default)]
    pub altitude: Option<f64>,
    /// When the position was recorded.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RoutePoint {
    /// A bare position with no altitude or timestamp.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            timestamp: None,
        }
    }

    /// Whether the coordinates are finite and within range.
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Whether two points share the same coordinates.
    pub fn same_position(&self, other: &Self) -> bool {
        (self.latitude - other.latitude).abs() < f64::EPSILON
            && (self.longitude - other.longitude).abs() < f64::EPSILON
    }

    /// Render the point as one line of the text format.
    pub fn to_line(&self) -> String {
        let mut line = format!("{};{}", self.latitude, self.longitude);
        match (self.altitude, self.timestamp) {
            (None, None) => {}
            (altitude, timestamp) => {
                line.push(';');
                if let Some(alt) = altitude {
                    line.push_str(&alt.to_string());
                }
                if let Some(ts) = timestamp {
                    line.push(';');
                    line.push_str(&ts.to_rfc3339());
                }
            }
        }
        line
    }
}

impl Planar for RoutePoint {
    fn xy(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }
}

impl FromStr for RoutePoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(';').map(str::trim);

        let latitude = parse_coordinate(fields.next(), "latitude")?;
        let longitude = parse_coordinate(fields.next(), "longitude")?;

        let altitude = match fields.next() {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<f64>()
                    .map_err(|e| format!("invalid altitude {raw:?}: {e}"))?,
            ),
        };

        let timestamp = match fields.next() {
            None | Some("") => None,
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))?
                    .with_timezone(&Utc),
            ),
        };

        if let Some(extra) = fields.next() {
            return Err(format!("unexpected trailing field {extra:?}"));
        }

        Ok(Self {
            latitude,
            longitude,
            altitude,
            timestamp,
        })
    }
}

fn parse_coordinate(field: Option<&str>, name: &str) -> Result<f64, String> {
    let raw = field
        .filter(|f| !f.is_empty())
        .ok_or_else(|| format!("missing {name}"))?;
    raw.parse::<f64>()
        .map_err(|e| format!("invalid {name} {raw:?}: {e}"))
}

/// An ordered, time-ascending sequence of recorded positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    points: Vec<RoutePoint>,
}

impl Route {
    /// Build a route, checking coordinate ranges and timestamp order.
    ///
    /// Points without a timestamp are not ordered against their
    /// neighbours; only consecutive timestamped points must not go back in
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::OutOfRange`] for an invalid coordinate, or
    /// [`GeoError::OutOfOrder`] if timestamps decrease.
    pub fn new(points: Vec<RoutePoint>) -> Result<Self, GeoError> {
        let mut last_timestamp: Option<DateTime<Utc>> = None;
        for (index, point) in points.iter().enumerate() {
            if !point.in_range() {
                return Err(GeoError::OutOfRange {
                    index,
                    latitude: point.latitude,
                    longitude: point.longitude,
                });
            }
            if let Some(ts) = point.timestamp {
                if last_timestamp.is_some_and(|prev| ts < prev) {
                    return Err(GeoError::OutOfOrder { index });
                }
                last_timestamp = Some(ts);
            }
        }
        Ok(Self { points })
    }

    /// Parse a route from the line-oriented text format.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::ParsePoint`] naming the first bad line, or any
    /// error from [`Route::new`].
    pub fn parse_lines(text: &str) -> Result<Self, GeoError> {
        let mut points = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let point = line.parse::<RoutePoint>().map_err(|reason| GeoError::ParsePoint {
                line: idx.saturating_add(1),
                reason,
            })?;
            points.push(point);
        }
        Self::new(points)
    }

    /// Render the route in the line-oriented text format.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for point in &self.points {
            out.push_str(&point.to_line());
            out.push('\n');
        }
        out
    }

    /// The recorded points in order.
    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    /// Number of points.
    pub const fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the route has no points.
    pub const fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Consume the route, returning its points.
    pub fn into_points(self) -> Vec<RoutePoint> {
        self.points
    }

    /// Produce a simplified copy of this route.
    ///
    /// The first and last points are always kept and retained points keep
    /// their original order. Routes of two points or fewer come back
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::InvalidTolerance`] if `tolerance` is not finite
    /// and positive.
    pub fn simplified(&self, tolerance: f64) -> Result<Self, GeoError> {
        let points = simplify::simplify(&self.points, tolerance)?
            .cloned()
            .collect();
        Ok(Self { points })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_with_all_fields() {
        let point: RoutePoint = "51.4700;-0.4543;1200;2026-03-01T10:00:00Z".parse().unwrap();
        assert!((point.latitude - 51.47).abs() < 1e-9);
        assert!((point.longitude + 0.4543).abs() < 1e-9);
        assert!(point.altitude.is_some_and(|a| (a - 1200.0).abs() < 1e-9));
        assert!(point.timestamp.is_some());
    }

    #[test]
    fn comma_decimal_is_rejected() {
        let parsed = "51,47;-0,45".parse::<RoutePoint>();
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_longitude_is_rejected() {
        assert!("51.47".parse::<RoutePoint>().is_err());
        assert!("51.47;".parse::<RoutePoint>().is_err());
    }

    #[test]
    fn parse_lines_reports_line_number() {
        let text = "# header\n10.0;20.0\n\n10,5;20.0\n";
        let err = Route::parse_lines(text).unwrap_err();
        assert!(matches!(err, GeoError::ParsePoint { line: 4, .. }));
    }

    #[test]
    fn text_format_round_trips() {
        let text = "10.25;20.5;3500;2026-03-01T10:00:00+00:00\n10.5;21;;2026-03-01T10:00:05+00:00\n11;22\n";
        let route = Route::parse_lines(text).unwrap();
        assert_eq!(route.len(), 3);
        let reparsed = Route::parse_lines(&route.to_lines()).unwrap();
        assert_eq!(reparsed, route);
    }

    #[test]
    fn out_of_order_timestamps_are_rejected() {
        let text = "10;20;;2026-03-01T10:00:05Z\n10;21;;2026-03-01T10:00:00Z\n";
        let err = Route::parse_lines(text).unwrap_err();
        assert!(matches!(err, GeoError::OutOfOrder { index: 1 }));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let err = Route::new(vec![RoutePoint::new(95.0, 0.0)]).unwrap_err();
        assert!(matches!(err, GeoError::OutOfRange { index: 0, .. }));
    }

    #[test]
    fn simplified_keeps_endpoints() {
        let route = Route::new(vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(0.000_01, 0.5),
            RoutePoint::new(0.0, 1.0),
        ])
        .unwrap();
        let simple = route.simplified(0.001).unwrap();
        assert_eq!(simple.len(), 2);
        assert_eq!(simple.points().first(), route.points().first());
        assert_eq!(simple.points().last(), route.points().last());
    }
}
