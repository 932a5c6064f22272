//! Geocoded-address fallback for disjoint pairs.
//!
//! The reconciler geocodes the linked title's address (best effort, external
//! provider) and hands the candidate points here; the decision itself stays
//! pure and testable.

use geo_types::Point;

use crate::consts::MOVED_DISTANCE_MAX_M;

/// True when any geocoded candidate lies within [`MOVED_DISTANCE_MAX_M`] of
/// the new polygon's centroid.
pub fn within_moved_distance(candidates: &[Point<f64>], centroid: Point<f64>) -> bool {
    candidates
        .iter()
        .any(|c| cad_geom::distance_m(*c, centroid) <= MOVED_DISTANCE_MAX_M)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_inside_radius_matches() {
        let centroid = Point::new(-0.1, 51.5);
        // ~33 m north.
        let near = Point::new(-0.1, 51.5 + 3e-4);
        assert!(within_moved_distance(&[near], centroid));
    }

    #[test]
    fn candidate_outside_radius_does_not_match() {
        let centroid = Point::new(-0.1, 51.5);
        // ~110 m north.
        let far = Point::new(-0.1, 51.5 + 1e-3);
        assert!(!within_moved_distance(&[far], centroid));
    }

    #[test]
    fn empty_candidate_list_never_matches() {
        assert!(!within_moved_distance(&[], Point::new(0.0, 0.0)));
    }

    #[test]
    fn any_of_many_candidates_suffices() {
        let centroid = Point::new(-0.1, 51.5);
        let far = Point::new(-0.2, 51.6);
        let near = Point::new(-0.1 + 1e-5, 51.5);
        assert!(within_moved_distance(&[far, near], centroid));
    }
}
