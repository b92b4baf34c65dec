//! Douglas-Peucker polyline simplification.
//!
//! For the segment between two retained anchor points, the intermediate
//! point farthest from the straight line joining the anchors is found. If
//! its perpendicular distance exceeds the tolerance it is retained and
//! both halves are simplified independently; otherwise every intermediate
//! point of the segment is dropped.
//!
//! [`simplify`] returns an iterator that yields the retained points lazily
//! and in their original order. The recursion is driven by an explicit
//! stack of pending segments, so long tracks cannot overflow the call
//! stack.
//!
//! Distances are planar, in the units of the coordinates (degrees for
//! [`RoutePoint`](crate::RoutePoint)). For a smaller tolerance the retained
//! set is always a superset of the set retained for a larger one.

use crate::error::GeoError;

/// A point that can be projected onto a plane for distance purposes.
pub trait Planar {
    /// Planar `(x, y)` coordinates of the point.
    fn xy(&self) -> (f64, f64);
}

/// `(latitude, longitude)` pairs.
impl Planar for (f64, f64) {
    fn xy(&self) -> (f64, f64) {
        (self.1, self.0)
    }
}

/// Lazily simplify `points` with the given tolerance.
///
/// Inputs of two points or fewer are yielded unchanged.
///
/// # Errors
///
/// Returns [`GeoError::InvalidTolerance`] if `tolerance` is not finite and
/// strictly positive.
pub fn simplify<T: Planar>(points: &[T], tolerance: f64) -> Result<Simplify<'_, T>, GeoError> {
    if !tolerance.is_finite() || tolerance <= 0.0 {
        return Err(GeoError::InvalidTolerance(tolerance));
    }

    let mut pending = Vec::new();
    if let Some(last) = points.len().checked_sub(1).filter(|&l| l > 0) {
        pending.push((0, last));
    }

    Ok(Simplify {
        points,
        tolerance,
        pending,
        started: false,
    })
}

/// Iterator over the points retained by Douglas-Peucker simplification.
///
/// Created by [`simplify`].
#[derive(Debug)]
pub struct Simplify<'a, T> {
    points: &'a [T],
    tolerance: f64,
    /// Segments still to process, as `(start, end)` indices. The top of the
    /// stack is always the leftmost unprocessed segment.
    pending: Vec<(usize, usize)>,
    started: bool,
}

impl<'a, T: Planar> Iterator for Simplify<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            return self.points.first();
        }

        while let Some((start, end)) = self.pending.pop() {
            match farthest_between(self.points, start, end) {
                Some((split, distance)) if distance > self.tolerance => {
                    self.pending.push((split, end));
                    self.pending.push((start, split));
                }
                _ => return self.points.get(end),
            }
        }

        None
    }
}

/// Index and distance of the point strictly between `start` and `end`
/// that lies farthest from the line through them. Ties keep the earliest.
fn farthest_between<T: Planar>(points: &[T], start: usize, end: usize) -> Option<(usize, f64)> {
    let anchor_a = points.get(start)?.xy();
    let anchor_b = points.get(end)?.xy();
    let first = start.checked_add(1)?;
    let inner = points.get(first..end)?;

    let mut best: Option<(usize, f64)> = None;
    for (offset, point) in inner.iter().enumerate() {
        let distance = perpendicular_distance(point.xy(), anchor_a, anchor_b);
        if best.is_none_or(|(_, d)| distance > d) {
            best = Some((first.saturating_add(offset), distance));
        }
    }
    best
}

/// Distance from `p` to the infinite line through `a` and `b`, or to `a`
/// itself when the anchors coincide.
#[allow(clippy::arithmetic_side_effects, clippy::suboptimal_flops)]
fn perpendicular_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = dx.hypot(dy);
    if length < f64::EPSILON {
        return (p.0 - a.0).hypot(p.1 - a.1);
    }
    (dx * (a.1 - p.1) - (a.0 - p.0) * dy).abs() / length
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::suboptimal_flops,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn run(points: &[(f64, f64)], tolerance: f64) -> Vec<(f64, f64)> {
        simplify(points, tolerance).unwrap().copied().collect()
    }

    #[test]
    fn short_inputs_are_returned_unchanged() {
        assert!(run(&[], 0.1).is_empty());
        assert_eq!(run(&[(1.0, 2.0)], 0.1), vec![(1.0, 2.0)]);
        assert_eq!(run(&[(1.0, 2.0), (3.0, 4.0)], 0.1), vec![(1.0, 2.0), (3.0, 4.0)]);
    }

    #[test]
    fn collinear_midpoint_collapses_to_anchors() {
        let points = [(0.0, 0.0), (0.0, 0.000_05), (0.0, 1.0)];
        assert_eq!(run(&points, 0.000_01), vec![(0.0, 0.0), (0.0, 1.0)]);
    }

    #[test]
    fn tiny_deviation_depends_on_tolerance() {
        let points = [(0.0, 0.0), (0.000_05, 0.5), (0.0, 1.0)];
        assert_eq!(run(&points, 0.001), vec![(0.0, 0.0), (0.0, 1.0)]);
        assert_eq!(run(&points, 0.000_01), points.to_vec());
    }

    #[test]
    fn retains_corner_and_drops_noise() {
        let points = [
            (0.0, 0.0),
            (0.001, 1.0),
            (0.0, 2.0),
            (1.0, 2.0),
            (2.0, 2.001),
            (3.0, 2.0),
        ];
        assert_eq!(run(&points, 0.01), vec![(0.0, 0.0), (0.0, 2.0), (3.0, 2.0)]);
    }

    #[test]
    fn coincident_anchors_use_point_distance() {
        let points = [(0.0, 0.0), (0.0, 1.0), (0.0, 0.0)];
        assert_eq!(run(&points, 0.5), points.to_vec());
        assert_eq!(run(&points, 2.0), vec![(0.0, 0.0), (0.0, 0.0)]);
    }

    #[test]
    fn smaller_tolerance_retains_superset() {
        let points: Vec<(f64, f64)> = (0..200_u32)
            .map(|i| {
                let x = f64::from(i) * 0.01;
                (x.sin() * 0.3 + (x * 7.0).cos() * 0.01, x)
            })
            .collect();
        let tolerances = [0.000_5, 0.002, 0.01, 0.05, 0.2];
        for pair in tolerances.windows(2) {
            let fine = run(&points, pair[0]);
            let coarse = run(&points, pair[1]);
            assert!(fine.len() >= coarse.len());
            assert!(coarse.iter().all(|p| fine.contains(p)));
        }
    }

    #[test]
    fn output_preserves_order_and_endpoints() {
        let points: Vec<(f64, f64)> = (0..50_u32).map(|i| (f64::from(i % 7), f64::from(i))).collect();
        let kept = run(&points, 0.5);
        assert_eq!(kept.first(), points.first());
        assert_eq!(kept.last(), points.last());
        assert!(kept.windows(2).all(|w| w[0].1 < w[1].1));
    }

    #[test]
    fn invalid_tolerance_is_rejected() {
        let points = [(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)];
        assert!(simplify(&points, 0.0).is_err());
        assert!(simplify(&points, -1.0).is_err());
        assert!(simplify(&points, f64::NAN).is_err());
    }

    #[test]
    fn iterator_is_lazy() {
        let points = [(0.0, 0.0), (1.0, 1.0), (0.0, 2.0), (1.0, 3.0)];
        let mut iter = simplify(&points, 0.1).unwrap();
        assert_eq!(iter.next(), Some(&(0.0, 0.0)));
        assert_eq!(iter.pending.len(), 1);
    }
}
