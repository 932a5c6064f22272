//! Shared fixtures for scenario tests.
//!
//! Deterministic polygon builders used across the workspace's test suites.
//! Nothing here touches a database or the network, and nothing here uses a
//! random source — "jitter" is a fixed per-vertex pattern so test outcomes
//! never flake.

use cad_geom::{exterior_ring, polygon_from_ring};
use geo_types::Polygon;

/// Axis-aligned square with corner `(x0, y0)` and the given side, degrees.
pub fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
    polygon_from_ring(&[
        (x0, y0),
        (x0 + side, y0),
        (x0 + side, y0 + side),
        (x0, y0 + side),
        (x0, y0),
    ])
    .expect("square ring is closed")
}

/// The canonical comparison fixture: the unit square at the origin.
pub fn unit_square() -> Polygon<f64> {
    square(0.0, 0.0, 1.0)
}

/// A parcel-scale square near central London (~70 m × 110 m).
pub fn london_parcel() -> Polygon<f64> {
    square(-0.1, 51.5, 1e-3)
}

/// Every vertex translated by `(dx, dy)` degrees.
pub fn shifted(poly: &Polygon<f64>, dx: f64, dy: f64) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = exterior_ring(poly)
        .into_iter()
        .map(|(x, y)| (x + dx, y + dy))
        .collect();
    polygon_from_ring(&ring).expect("shifted ring stays closed")
}

/// Deterministic per-vertex jitter bounded by `amplitude` on each axis.
///
/// The pattern varies vertex to vertex, so the offsets have non-trivial
/// standard deviation (a jittered polygon is never mistaken for a rigid
/// shift).  The closing vertex is forced equal to the (jittered) first.
pub fn jittered(poly: &Polygon<f64>, amplitude: f64) -> Polygon<f64> {
    let mut ring: Vec<(f64, f64)> = exterior_ring(poly)
        .into_iter()
        .enumerate()
        .map(|(i, (x, y))| {
            let dx = amplitude * 0.75 * ((i % 3) as f64 - 1.0);
            let dy = amplitude * 0.6 * (1.0 - (i % 2) as f64 * 2.0);
            (x + dx, y + dy)
        })
        .collect();
    let first = ring[0];
    *ring.last_mut().expect("ring not empty") = first;
    polygon_from_ring(&ring).expect("jittered ring stays closed")
}

/// GeoJSON geometry value for a polygon (convenience for DB fixtures).
pub fn geojson_of(poly: &Polygon<f64>) -> serde_json::Value {
    cad_geom::polygon_to_geojson(poly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded_and_closed() {
        let p = unit_square();
        let amplitude = 2e-6;
        let q = jittered(&p, amplitude);
        let orig = exterior_ring(&p);
        let moved = exterior_ring(&q);
        assert_eq!(orig.len(), moved.len());
        for ((x0, y0), (x1, y1)) in orig.iter().zip(moved.iter()) {
            assert!((x1 - x0).abs() <= amplitude, "dx {}", x1 - x0);
            assert!((y1 - y0).abs() <= amplitude, "dy {}", y1 - y0);
        }
        assert_eq!(moved.first(), moved.last());
    }

    #[test]
    fn shifted_preserves_shape() {
        let p = london_parcel();
        let q = shifted(&p, 1e-4, -1e-4);
        assert!((cad_geom::area_sqm(&p) - cad_geom::area_sqm(&q)).abs() < 1.0);
    }
}
