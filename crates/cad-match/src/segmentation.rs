//! Merge/segment analysis for pairs the primary cascade rejected.
//!
//! Gated off by default to mirror the live configuration; when enabled the
//! reconciler calls [`analyse`] with the neighbouring boundaries it collected
//! via the bbox index, and maps the outcome to the merge/segment tags.
//!
//! The analysis operates on the symmetric difference of old and new:
//! sub-polygons under the sliver threshold are artefacts of the boolean
//! engine; the survivors are shrunk by `max(1 m, √area / 10)` to strip
//! artefacts hugging long thin edges; whatever remains is genuine territory,
//! matched against accepted polygons (gained territory ⇒ those ids were
//! absorbed, a merge) and pending polygons (lost territory ⇒ those ids are
//! new segments of the old boundary).

use geo_types::{MultiPolygon, Polygon};

use cad_geom::{area_sqm, drop_slivers, erode, intersection, overlaps, sym_difference};

use crate::classify::MatchError;
use crate::consts::ZERO_AREA_SQM;

/// Runtime gate for the merge/segment cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationConfig {
    pub enabled: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        // Off in production: the cascade is correct but too expensive to run
        // across a full month, and a disabled cascade only converts would-be
        // merge/segment tags into Fail (retaining the old boundary).
        Self { enabled: false }
    }
}

/// Neighbouring boundaries for one comparison.  Must not contain the pending
/// polygon itself or the accepted boundary being compared.
#[derive(Debug, Clone, Default)]
pub struct NeighborContext {
    /// Other accepted boundaries whose bbox intersects the comparison.
    pub accepted: Vec<(i64, Polygon<f64>)>,
    /// Other pending boundaries (same run) whose bbox intersects.
    pub pending: Vec<(i64, Polygon<f64>)>,
}

/// Outcome of the merge/segment analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationOutcome {
    /// The symmetric difference was all artefact: same parcel, shared edges
    /// nudged.
    BoundariesShifted,
    /// Every gained region maps onto accepted neighbours; they merged away.
    Merged { absorbed: Vec<i64> },
    /// Gained territory only partially identified.
    MergedIncomplete { absorbed: Vec<i64> },
    /// Every lost region maps onto pending siblings; the boundary split.
    Segmented { siblings: Vec<i64> },
    /// Lost territory only partially identified.
    SegmentedIncomplete { siblings: Vec<i64> },
    /// Territory both gained and lost, with at least one side identified.
    MergedAndSegmented { absorbed: Vec<i64>, siblings: Vec<i64> },
    /// Real territory changed hands but nothing could be identified; the
    /// caller records `Fail`.
    Unresolved,
}

/// One surviving sub-polygon of the symmetric difference.
struct Region {
    /// The shrunk region used for neighbour matching.
    eroded: MultiPolygon<f64>,
    /// True when the region lies inside `new` (gained), false when inside
    /// `old` (lost).
    gained: bool,
}

/// Run the merge/segment analysis on a pair the primary cascade rejected.
pub fn analyse(
    old: &Polygon<f64>,
    new: &Polygon<f64>,
    ctx: &NeighborContext,
) -> Result<SegmentationOutcome, MatchError> {
    let diff = sym_difference(old, new)?;
    let pieces = drop_slivers(&diff, ZERO_AREA_SQM);

    let mut regions: Vec<Region> = Vec::new();
    for piece in &pieces {
        let piece_area = area_sqm(piece);
        let shrink_m = 1.0_f64.max(piece_area.sqrt() / 10.0);
        let eroded = erode(piece, shrink_m)?;
        if eroded.0.is_empty() {
            // Long thin edge artefact; erosion consumed it.
            continue;
        }

        let inside_new: f64 = intersection(piece, new)?
            .0
            .iter()
            .map(area_sqm)
            .sum();
        regions.push(Region {
            eroded,
            gained: inside_new > piece_area / 2.0,
        });
    }

    if regions.is_empty() {
        return Ok(SegmentationOutcome::BoundariesShifted);
    }

    let mut absorbed: Vec<i64> = Vec::new();
    let mut siblings: Vec<i64> = Vec::new();
    let mut gained_total = 0usize;
    let mut gained_identified = 0usize;
    let mut lost_total = 0usize;
    let mut lost_identified = 0usize;

    for region in &regions {
        let pool = if region.gained { &ctx.accepted } else { &ctx.pending };
        let mut matched = false;
        for (id, candidate) in pool {
            if region_overlaps(&region.eroded, candidate)? {
                matched = true;
                let list = if region.gained { &mut absorbed } else { &mut siblings };
                if !list.contains(id) {
                    list.push(*id);
                }
            }
        }
        if region.gained {
            gained_total += 1;
            if matched {
                gained_identified += 1;
            }
        } else {
            lost_total += 1;
            if matched {
                lost_identified += 1;
            }
        }
    }

    absorbed.sort_unstable();
    siblings.sort_unstable();

    Ok(match (gained_total, lost_total) {
        (g, 0) if g > 0 => {
            if gained_identified == 0 {
                SegmentationOutcome::Unresolved
            } else if gained_identified == g {
                SegmentationOutcome::Merged { absorbed }
            } else {
                SegmentationOutcome::MergedIncomplete { absorbed }
            }
        }
        (0, l) if l > 0 => {
            if lost_identified == 0 {
                SegmentationOutcome::Unresolved
            } else if lost_identified == l {
                SegmentationOutcome::Segmented { siblings }
            } else {
                SegmentationOutcome::SegmentedIncomplete { siblings }
            }
        }
        _ => {
            if gained_identified == 0 && lost_identified == 0 {
                SegmentationOutcome::Unresolved
            } else {
                SegmentationOutcome::MergedAndSegmented { absorbed, siblings }
            }
        }
    })
}

fn region_overlaps(region: &MultiPolygon<f64>, candidate: &Polygon<f64>) -> Result<bool, MatchError> {
    for part in &region.0 {
        if overlaps(part, candidate)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cad_geom::polygon_from_ring;

    // Parcel-scale fixtures: sides in units of 1e-3 degrees (~100 m).
    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        let k = 1e-3;
        polygon_from_ring(&[
            (x0 * k, y0 * k),
            (x1 * k, y0 * k),
            (x1 * k, y1 * k),
            (x0 * k, y1 * k),
            (x0 * k, y0 * k),
        ])
        .unwrap()
    }

    #[test]
    fn absorbing_a_neighbour_is_merged() {
        let old = rect(0.0, 0.0, 1.0, 1.0);
        let new = rect(0.0, 0.0, 2.0, 1.0);
        let neighbour = rect(1.0, 0.0, 2.0, 1.0);
        let ctx = NeighborContext {
            accepted: vec![(42, neighbour)],
            pending: Vec::new(),
        };
        let out = analyse(&old, &new, &ctx).unwrap();
        assert_eq!(out, SegmentationOutcome::Merged { absorbed: vec![42] });
    }

    #[test]
    fn unidentified_gain_is_unresolved() {
        let old = rect(0.0, 0.0, 1.0, 1.0);
        let new = rect(0.0, 0.0, 2.0, 1.0);
        let out = analyse(&old, &new, &NeighborContext::default()).unwrap();
        assert_eq!(out, SegmentationOutcome::Unresolved);
    }

    #[test]
    fn splitting_into_a_sibling_is_segmented() {
        let old = rect(0.0, 0.0, 2.0, 1.0);
        let new = rect(0.0, 0.0, 1.0, 1.0);
        let sibling = rect(1.0, 0.0, 2.0, 1.0);
        let ctx = NeighborContext {
            accepted: Vec::new(),
            pending: vec![(7, sibling)],
        };
        let out = analyse(&old, &new, &ctx).unwrap();
        assert_eq!(out, SegmentationOutcome::Segmented { siblings: vec![7] });
    }

    #[test]
    fn gain_and_loss_with_identified_sides_is_merged_and_segmented() {
        let old = rect(0.0, 0.0, 1.0, 1.0);
        let new = rect(0.5, 0.0, 1.5, 1.0);
        let absorbed_neighbour = rect(1.0, 0.0, 2.0, 1.0);
        let pending_sibling = rect(0.0, 0.0, 0.5, 1.0);
        let ctx = NeighborContext {
            accepted: vec![(3, absorbed_neighbour)],
            pending: vec![(9, pending_sibling)],
        };
        let out = analyse(&old, &new, &ctx).unwrap();
        assert_eq!(
            out,
            SegmentationOutcome::MergedAndSegmented {
                absorbed: vec![3],
                siblings: vec![9],
            }
        );
    }

    #[test]
    fn partial_identification_is_incomplete() {
        // Two gained regions, a neighbour identifies only one.
        let old = rect(1.0, 0.0, 2.0, 1.0);
        let new = rect(0.0, 0.0, 3.0, 1.0);
        let neighbour = rect(2.0, 0.0, 3.0, 1.0); // identifies the right gain only
        let ctx = NeighborContext {
            accepted: vec![(5, neighbour)],
            pending: Vec::new(),
        };
        let out = analyse(&old, &new, &ctx).unwrap();
        assert_eq!(out, SegmentationOutcome::MergedIncomplete { absorbed: vec![5] });
    }

    #[test]
    fn hairline_edge_movement_is_boundaries_shifted() {
        let old = rect(0.0, 0.0, 1.0, 1.0);
        // Right edge nudged by 1e-8 deg (~1 mm): sym-diff strip area well
        // under the sliver threshold.
        let k = 1e-3;
        let new = polygon_from_ring(&[
            (0.0, 0.0),
            (1.0 * k + 1e-8, 0.0),
            (1.0 * k + 1e-8, 1.0 * k),
            (0.0, 1.0 * k),
            (0.0, 0.0),
        ])
        .unwrap();
        let out = analyse(&old, &new, &NeighborContext::default()).unwrap();
        assert_eq!(out, SegmentationOutcome::BoundariesShifted);
    }

    #[test]
    fn default_config_is_disabled() {
        assert!(!SegmentationConfig::default().enabled);
    }
}
