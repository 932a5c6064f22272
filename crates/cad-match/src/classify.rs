//! The primary classification cascade.

use std::fmt;

use cad_geom::{exterior_ring, overlap_areas, GeomError};
use geo_types::Polygon;

use crate::consts::{
    ABS_DIFF_MAX_SQM, COORD_EPS_DEG, OFFSET_MEAN_MAX_DEG, OFFSET_STD_MAX_DEG,
    PERCENT_INTERSECT_MIN,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum MatchError {
    /// The boolean engine could not process one of the polygons.  Treated as
    /// a data-row error: the pending row fails and the loop continues.
    Geometry(GeomError),
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::Geometry(e) => write!(f, "geometry error: {e}"),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<GeomError> for MatchError {
    fn from(e: GeomError) -> Self {
        MatchError::Geometry(e)
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of the primary cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Identical vertex-for-vertex within [`COORD_EPS_DEG`].
    Exact,
    /// Every vertex moved by the same small offset (publisher reprojection).
    /// The offset should become the council's sticky offset.
    ExactOffset { offset: (f64, f64) },
    /// Same parcel, slightly different outline.
    HighOverlap,
    /// Zero intersection.  The caller decides `Moved` (geocoded title address
    /// within range of the new centroid) or `Fail`.
    Disjoint,
    /// None of the accepting rules matched.
    Fail,
}

/// A verdict plus the measurements that produced it, consumed by the
/// per-council statistics output.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub verdict: Verdict,
    /// Per-axis mean of (new − old), present when vertex counts matched.
    pub mean_offset: Option<(f64, f64)>,
    /// Per-axis population standard deviation of (new − old).
    pub std_offset: Option<(f64, f64)>,
    pub percentage_intersect: f64,
    pub sym_difference_sqm: f64,
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// Classify `new` against the accepted boundary `old`.
///
/// `council_offset` is the sticky offset learned from the council's most
/// recent `ExactOffset` match, `(0, 0)` initially; it translates `old` before
/// the overlap comparison so a bulk-reprojected council does not fail every
/// subsequent parcel.
///
/// Rule order (first match wins):
/// 1. equal vertex counts, all pairs within epsilon ⇒ `Exact`;
/// 2. equal vertex counts and near-zero offset deviation (a rigid shift)
///    within the mean ceiling ⇒ `ExactOffset`; beyond the ceiling the shift
///    is never smoothed over by the overlap rules, though a zero-overlap
///    relocation still reaches the geocoded-address fallback;
/// 3. zero intersection ⇒ `Disjoint` (caller resolves `Moved`/`Fail`);
/// 4. symmetric difference under [`ABS_DIFF_MAX_SQM`] or percentage
///    intersect over [`PERCENT_INTERSECT_MIN`] ⇒ `HighOverlap`;
/// 5. otherwise `Fail`.
pub fn classify(
    old: &Polygon<f64>,
    new: &Polygon<f64>,
    council_offset: (f64, f64),
) -> Result<Comparison, MatchError> {
    let old_ring = open_ring(old);
    let new_ring = open_ring(new);

    let mut mean_offset = None;
    let mut std_offset = None;
    let mut oversized_rigid_shift = false;

    if old_ring.len() == new_ring.len() && !old_ring.is_empty() {
        if rings_within_eps(&old_ring, &new_ring) {
            return Ok(Comparison {
                verdict: Verdict::Exact,
                mean_offset: Some((0.0, 0.0)),
                std_offset: Some((0.0, 0.0)),
                percentage_intersect: 100.0,
                sym_difference_sqm: 0.0,
            });
        }

        let (mean, std) = offset_stats(&old_ring, &new_ring);
        mean_offset = Some(mean);
        std_offset = Some(std);

        // A rigid-body shift: every vertex moved identically.
        if std.0 < OFFSET_STD_MAX_DEG && std.1 < OFFSET_STD_MAX_DEG {
            if mean.0.abs() < OFFSET_MEAN_MAX_DEG && mean.1.abs() < OFFSET_MEAN_MAX_DEG {
                // Overlap of a small rigid shift is implied by the offset;
                // skip the boolean engine.
                return Ok(Comparison {
                    verdict: Verdict::ExactOffset { offset: mean },
                    mean_offset,
                    std_offset,
                    percentage_intersect: 100.0,
                    sym_difference_sqm: 0.0,
                });
            }
            // A uniform shift beyond projection drift: never smoothed over
            // by the overlap rules, but a zero-intersection relocation still
            // gets the geocoded-address fallback.
            oversized_rigid_shift = true;
        }
    }

    // Bias the comparison by the council's learned offset before measuring.
    let shifted_old = translate_by(old, council_offset);
    let areas = overlap_areas(&shifted_old, new)?;
    let pct = areas.percentage_intersect();

    let verdict = if areas.intersection_sqm == 0.0 {
        Verdict::Disjoint
    } else if !oversized_rigid_shift
        && (areas.sym_difference_sqm < ABS_DIFF_MAX_SQM || pct > PERCENT_INTERSECT_MIN)
    {
        Verdict::HighOverlap
    } else {
        Verdict::Fail
    };

    Ok(Comparison {
        verdict,
        mean_offset,
        std_offset,
        percentage_intersect: pct,
        sym_difference_sqm: areas.sym_difference_sqm,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Exterior vertices without the closing duplicate.
fn open_ring(poly: &Polygon<f64>) -> Vec<(f64, f64)> {
    let mut ring = exterior_ring(poly);
    if ring.len() >= 2 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

fn rings_within_eps(old: &[(f64, f64)], new: &[(f64, f64)]) -> bool {
    old.iter()
        .zip(new.iter())
        .all(|(o, n)| (n.0 - o.0).abs() < COORD_EPS_DEG && (n.1 - o.1).abs() < COORD_EPS_DEG)
}

/// Per-axis mean and population standard deviation of (new − old).
fn offset_stats(old: &[(f64, f64)], new: &[(f64, f64)]) -> ((f64, f64), (f64, f64)) {
    let n = old.len() as f64;
    let diffs: Vec<(f64, f64)> = old
        .iter()
        .zip(new.iter())
        .map(|(o, p)| (p.0 - o.0, p.1 - o.1))
        .collect();

    let mean = (
        diffs.iter().map(|d| d.0).sum::<f64>() / n,
        diffs.iter().map(|d| d.1).sum::<f64>() / n,
    );
    let var = (
        diffs.iter().map(|d| (d.0 - mean.0).powi(2)).sum::<f64>() / n,
        diffs.iter().map(|d| (d.1 - mean.1).powi(2)).sum::<f64>() / n,
    );
    (mean, (var.0.sqrt(), var.1.sqrt()))
}

fn translate_by(poly: &Polygon<f64>, offset: (f64, f64)) -> Polygon<f64> {
    if offset == (0.0, 0.0) {
        return poly.clone();
    }
    use geo::Translate;
    poly.translate(offset.0, offset.1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cad_geom::polygon_from_ring;

    fn unit_square() -> Polygon<f64> {
        polygon_from_ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]).unwrap()
    }

    fn shifted(poly: &Polygon<f64>, dx: f64, dy: f64) -> Polygon<f64> {
        let ring: Vec<(f64, f64)> = exterior_ring(poly)
            .into_iter()
            .map(|(x, y)| (x + dx, y + dy))
            .collect();
        polygon_from_ring(&ring).unwrap()
    }

    #[test]
    fn identity_is_exact() {
        let p = unit_square();
        let c = classify(&p, &p, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::Exact);
        assert_eq!(c.percentage_intersect, 100.0);
    }

    #[test]
    fn sub_epsilon_difference_is_exact() {
        let p = unit_square();
        let q = shifted(&p, 5e-7, -5e-7);
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::Exact);
    }

    #[test]
    fn uniform_small_shift_is_exact_offset_with_recovered_offset() {
        let p = unit_square();
        let q = shifted(&p, 9e-5, -3e-6);
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        match c.verdict {
            Verdict::ExactOffset { offset } => {
                assert!((offset.0 - 9e-5).abs() < 1e-9, "lng offset {}", offset.0);
                assert!((offset.1 + 3e-6).abs() < 1e-9, "lat offset {}", offset.1);
            }
            other => panic!("expected ExactOffset, got {other:?}"),
        }
    }

    #[test]
    fn uniform_shift_over_mean_threshold_fails() {
        let p = unit_square();
        let q = shifted(&p, 1e-5, -1.1e-4);
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::Fail);
        let mean = c.mean_offset.unwrap();
        assert!((mean.1 + 1.1e-4).abs() < 1e-9);
    }

    #[test]
    fn jitter_below_two_eps_is_high_overlap() {
        let p = unit_square();
        // Deterministic "noise" below 2e-6 per axis, varying per vertex so the
        // standard deviation exceeds the rigid-shift ceiling.
        let ring: Vec<(f64, f64)> = exterior_ring(&p)
            .into_iter()
            .enumerate()
            .map(|(i, (x, y))| {
                let dx = 1.5e-6 * ((i % 3) as f64 - 1.0);
                let dy = -1.2e-6 * ((i % 2) as f64);
                (x + dx, y + dy)
            })
            .collect();
        // Close the ring exactly as the first vertex moved.
        let mut ring = ring;
        let first = ring[0];
        *ring.last_mut().unwrap() = first;
        let q = polygon_from_ring(&ring).unwrap();

        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::HighOverlap, "{c:?}");
        assert!(c.percentage_intersect > 95.0);
        assert!(c.percentage_intersect < 100.0);
    }

    #[test]
    fn disjoint_pair_reported_for_geocode_fallback() {
        let p = unit_square();
        let q = shifted(&p, 10.0, 0.0);
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::Disjoint);
        assert_eq!(c.percentage_intersect, 0.0);
    }

    #[test]
    fn partial_overlap_without_high_percentage_fails() {
        let p = unit_square();
        let q = shifted(&p, 0.5, 0.0);
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::Fail);
        assert!(c.percentage_intersect > 0.0);
        assert!(c.percentage_intersect < 95.0);
    }

    #[test]
    fn sticky_offset_rescues_shifted_council() {
        // Old boundary recorded before the council re-projected wholesale.
        // Vertex counts differ so the rigid-shift rule cannot trigger;
        // without the sticky offset the pair is disjoint, with it the pair
        // is accepted.
        let p = unit_square();
        let offset = (2.0, 0.0); // gross shift, clearly disjoint unbiased
        let q_ring: Vec<(f64, f64)> = vec![
            (0.0 + offset.0, 0.0),
            (0.5 + offset.0, 0.0), // extra vertex on the bottom edge
            (1.0 + offset.0, 0.0),
            (1.0 + offset.0, 1.0),
            (0.0 + offset.0, 1.0),
            (0.0 + offset.0, 0.0),
        ];
        let q = polygon_from_ring(&q_ring).unwrap();

        let unbiased = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(unbiased.verdict, Verdict::Disjoint);

        let biased = classify(&p, &q, offset).unwrap();
        assert_eq!(biased.verdict, Verdict::HighOverlap, "{biased:?}");
    }

    #[test]
    fn vertex_count_change_with_tiny_area_change_is_high_overlap() {
        // One edge gains a collinear-ish midpoint nudged outward a hair:
        // overlap acceptance still applies even though vertex counts differ.
        let p = unit_square();
        let q = polygon_from_ring(&[
            (0.0, 0.0),
            (0.5, -1e-6),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ])
        .unwrap();
        let c = classify(&p, &q, (0.0, 0.0)).unwrap();
        assert_eq!(c.verdict, Verdict::HighOverlap, "{c:?}");
        assert!(c.mean_offset.is_none());
    }
}
