//! Recorded flight routes and path simplification for the Skyrelay hub.
//!
//! Recorded tracks are dense: a client reporting several times a second
//! produces thousands of nearly collinear points per flight. Before a
//! track is stored or sent to a viewer it is shrunk with Douglas-Peucker
//! simplification, which keeps the shape within a tolerance while dropping
//! the redundant points.
//!
//! # Modules
//!
//! - [`error`] -- Error types for route parsing and simplification.
//! - [`route`] -- [`Route`] and [`RoutePoint`], including the
//!   locale-independent line format.
//! - [`recorder`] -- [`TrackRecorder`], the per-aircraft track in progress.
//! - [`simplify`] -- The lazy Douglas-Peucker iterator.
//! - [`store`] -- The [`RouteStore`] boundary and its in-memory default.

pub mod error;
pub mod recorder;
pub mod route;
pub mod simplify;
pub mod store;

pub use error::GeoError;
pub use recorder::TrackRecorder;
pub use route::{Route, RoutePoint};
pub use simplify::{Planar, Simplify, simplify};
pub use store::{MemoryRouteStore, RouteStore};
