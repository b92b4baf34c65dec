//! Error types for the `skyrelay-geo` crate.

/// Errors that can occur when building, parsing, or simplifying routes.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// The simplification tolerance is not a finite positive number.
    #[error("tolerance must be finite and greater than zero, got {0}")]
    InvalidTolerance(f64),

    /// A route point could not be parsed from text.
    #[error("line {line}: {reason}")]
    ParsePoint {
        /// One-based line number within the parsed text.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// A point's coordinates are outside the valid latitude/longitude range.
    #[error("point {index} is out of range: ({latitude}, {longitude})")]
    OutOfRange {
        /// Zero-based index of the point.
        index: usize,
        /// The offending latitude.
        latitude: f64,
        /// The offending longitude.
        longitude: f64,
    },

    /// Timestamps are not in ascending order.
    #[error("point {index} is timestamped before its predecessor")]
    OutOfOrder {
        /// Zero-based index of the first point that goes back in time.
        index: usize,
    },
}
