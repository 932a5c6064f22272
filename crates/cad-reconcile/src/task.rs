//! The reconcile loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use geo_types::Polygon;
use sqlx::PgPool;
use tracing::{info, warn};

use cad_db::boundaries::{
    accepted_intersecting, accepted_lookup, pending_after, pending_intersecting,
};
use cad_db::ledger::{ledger_set_inspire_month, ledger_set_poly_cursor};
use cad_db::ownership::ownership_address;
use cad_db::{PendingRow, PromotionReport};
use cad_geom::BboxIndex;
use cad_match::moved::within_moved_distance;
use cad_match::segmentation::{analyse, NeighborContext, SegmentationConfig, SegmentationOutcome};
use cad_match::{classify, MatchError, Verdict};
use cad_schemas::{MatchSummary, MatchType};

use crate::analysis::AnalysisCollector;
use crate::geocode::Geocoder;
use crate::policy::{apply_decision, Decision};
use crate::sticky::CouncilOffsets;

/// Rows fetched per loop iteration; classification itself is row-at-a-time.
const BATCH_ROWS: i64 = 500;

pub struct PolygonReconcileArgs<'a> {
    pub pool: &'a PgPool,
    pub ledger_id: i64,
    pub geocoder: &'a dyn Geocoder,
    pub segmentation: SegmentationConfig,
    pub record_stats: bool,
    pub max_polygons: Option<u64>,
    /// Resume cursor: rows with `poly_id` greater than this are processed.
    pub start_after: i64,
    /// Stall discipline: fail and step over the first row instead of
    /// classifying it (it has crashed this loop too many times).
    pub skip_first: bool,
    /// Where the analysis artifacts land.
    pub analysis_dir: PathBuf,
    /// Promote accepted rows at the end (`updateBoundaries` on an unlimited
    /// run — the caller resolves that condition).
    pub promote: bool,
    /// Publish month recorded as `latest_inspire_data` after promotion.
    pub publish_month: NaiveDate,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub processed: u64,
    pub summary: MatchSummary,
    pub promotion: Option<PromotionReport>,
    /// True when `max_polygons` cut the pass short.
    pub limited: bool,
    pub analysis_files: Vec<PathBuf>,
}

/// Run the reconcile task from the ledger cursor to the end of the pending
/// table (or the polygon cap).
pub async fn run_polygon_reconcile(args: PolygonReconcileArgs<'_>) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let mut collector = AnalysisCollector::new(args.record_stats);
    let mut offsets = CouncilOffsets::new();
    let mut cursor = args.start_after;
    let mut skip_first = args.skip_first;

    'outer: loop {
        let batch = pending_after(args.pool, cursor, BATCH_ROWS).await?;
        if batch.is_empty() {
            break;
        }

        for row in batch {
            if args
                .max_polygons
                .is_some_and(|cap| report.processed >= cap)
            {
                report.limited = true;
                break 'outer;
            }

            let decision = if std::mem::take(&mut skip_first) {
                warn!(
                    poly_id = row.poly_id,
                    "skipping pending row after repeated stalled resumes"
                );
                collector.record_failure(
                    row.poly_id,
                    &row.council,
                    "skipped: repeated stalls at this row",
                    None,
                );
                Decision::Simple(MatchType::Fail)
            } else {
                classify_row(&args, &row, &mut offsets, &mut collector).await?
            };

            apply_decision(args.pool, row.poly_id, &decision).await?;
            collector.record_tag(row.poly_id, decision.tag());

            // Durable after every row: a crash re-does at most this polygon.
            ledger_set_poly_cursor(args.pool, args.ledger_id, row.poly_id).await?;
            cursor = row.poly_id;
            report.processed += 1;
        }
    }

    report.summary = collector.summary();
    report.analysis_files = collector
        .write_all(&args.analysis_dir)
        .context("write analysis artifacts")?;

    if args.promote && !report.limited {
        let promotion = cad_db::boundaries::promote_accepted(args.pool).await?;
        ledger_set_inspire_month(args.pool, args.ledger_id, args.publish_month).await?;
        info!(
            promoted = promotion.promoted,
            deleted = promotion.deleted,
            month = %args.publish_month,
            "accepted boundaries promoted"
        );
        report.promotion = Some(promotion);
    }

    info!(
        processed = report.processed,
        limited = report.limited,
        "reconcile pass complete"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// Per-row classification
// ---------------------------------------------------------------------------

async fn classify_row(
    args: &PolygonReconcileArgs<'_>,
    row: &PendingRow,
    offsets: &mut CouncilOffsets,
    collector: &mut AnalysisCollector,
) -> Result<Decision> {
    // 1. Only simple polygons reconcile; anything else fails outright.
    let new_poly = match parse_polygon(&row.geojson) {
        Some(p) => p,
        None => {
            collector.record_failure(row.poly_id, &row.council, "not a simple polygon", None);
            return Ok(Decision::Simple(MatchType::Fail));
        }
    };

    // 2. The accepted boundary with the same identifier.
    let accepted = accepted_lookup(args.pool, row.poly_id).await?;

    let Some(accepted) = accepted else {
        return classify_new_identifier(args, row, &new_poly, collector).await;
    };

    let Some(old_poly) = parse_polygon(&accepted.geojson) else {
        // A stored boundary we can no longer parse is a data-row error on
        // this comparison, not a crash.
        collector.record_failure(row.poly_id, &row.council, "stored boundary unparsable", None);
        return Ok(Decision::Simple(MatchType::Fail));
    };

    // 3. Primary cascade, biased by the council's sticky offset.
    let comparison = match classify(&old_poly, &new_poly, offsets.get(&row.council)) {
        Ok(c) => c,
        Err(MatchError::Geometry(e)) => {
            warn!(poly_id = row.poly_id, error = %e, "boolean engine rejected pair");
            collector.record_failure(
                row.poly_id,
                &row.council,
                format!("degenerate geometry: {e}"),
                None,
            );
            return Ok(Decision::Simple(MatchType::Fail));
        }
    };

    collector.stats.record(
        &row.council,
        comparison.percentage_intersect,
        comparison.mean_offset.zip(comparison.std_offset),
    );

    match comparison.verdict {
        Verdict::Exact => Ok(Decision::Simple(MatchType::Exact)),
        Verdict::ExactOffset { offset } => {
            offsets.set(&row.council, offset);
            Ok(Decision::Simple(MatchType::ExactOffset))
        }
        Verdict::HighOverlap => Ok(Decision::Simple(MatchType::HighOverlap)),
        Verdict::Disjoint => {
            classify_disjoint(args, row, &new_poly, accepted.title_no.as_deref(), collector).await
        }
        Verdict::Fail => {
            classify_failed_overlap(args, row, &old_poly, &new_poly, &comparison, collector).await
        }
    }
}

/// No accepted boundary with this id: new territory is accepted as
/// `NewBoundary`; overlap with existing accepted polygons means a possibly
/// recycled identifier, which is failed for human review rather than
/// guessed at.
async fn classify_new_identifier(
    args: &PolygonReconcileArgs<'_>,
    row: &PendingRow,
    new_poly: &Polygon<f64>,
    collector: &mut AnalysisCollector,
) -> Result<Decision> {
    let overlapping = accepted_intersecting(args.pool, &row.geojson, Some(row.poly_id)).await?;

    let mut overlapping_ids = Vec::new();
    for (id, geojson) in &overlapping {
        if let Some(poly) = parse_polygon(geojson) {
            if cad_geom::overlaps(new_poly, &poly).unwrap_or(false) {
                overlapping_ids.push(*id);
            }
        }
    }

    if overlapping_ids.is_empty() {
        Ok(Decision::Simple(MatchType::NewBoundary))
    } else {
        collector.record_id_change(row.poly_id, overlapping_ids);
        collector.record_failure(
            row.poly_id,
            &row.council,
            "unknown id overlapping accepted territory",
            None,
        );
        Ok(Decision::Simple(MatchType::Fail))
    }
}

/// Zero intersection: the geocoded-address fallback decides `Moved` vs
/// `Fail`.
async fn classify_disjoint(
    args: &PolygonReconcileArgs<'_>,
    row: &PendingRow,
    new_poly: &Polygon<f64>,
    title_no: Option<&str>,
    collector: &mut AnalysisCollector,
) -> Result<Decision> {
    let candidates = match title_no {
        Some(title) if args.geocoder.enabled() => {
            match ownership_address(args.pool, title).await? {
                Some(addr) => {
                    let text = [addr.property_address, addr.postcode]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(", ");
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        match args.geocoder.geocode(&text).await {
                            Ok(points) => points,
                            Err(e) => {
                                // Best effort: a geocoder outage downgrades
                                // to "no candidates", never aborts the run.
                                warn!(poly_id = row.poly_id, error = %e, "geocode failed");
                                Vec::new()
                            }
                        }
                    }
                }
                None => Vec::new(),
            }
        }
        _ => Vec::new(),
    };

    let centroid = match cad_geom::centroid(new_poly) {
        Ok(c) => c,
        Err(_) => {
            collector.record_failure(row.poly_id, &row.council, "no centroid", Some(0.0));
            return Ok(Decision::Simple(MatchType::Fail));
        }
    };

    if within_moved_distance(&candidates, centroid) {
        Ok(Decision::Simple(MatchType::Moved))
    } else {
        collector.record_failure(
            row.poly_id,
            &row.council,
            "disjoint from accepted boundary",
            Some(0.0),
        );
        Ok(Decision::Simple(MatchType::Fail))
    }
}

/// The primary cascade said `Fail`: run the gated merge/segment cascade if
/// enabled, otherwise record the failure.
async fn classify_failed_overlap(
    args: &PolygonReconcileArgs<'_>,
    row: &PendingRow,
    old_poly: &Polygon<f64>,
    new_poly: &Polygon<f64>,
    comparison: &cad_match::Comparison,
    collector: &mut AnalysisCollector,
) -> Result<Decision> {
    if !args.segmentation.enabled {
        collector.record_failure(
            row.poly_id,
            &row.council,
            "below overlap thresholds",
            Some(comparison.percentage_intersect),
        );
        return Ok(Decision::Simple(MatchType::Fail));
    }

    // Gained territory can only have come from accepted neighbours of the
    // new outline; lost territory reappears among pending siblings of the
    // old outline.  The bbox index prunes the candidate sets before the
    // boolean matching inside the analysis.
    let accepted_raw = accepted_intersecting(args.pool, &row.geojson, Some(row.poly_id)).await?;
    let old_geojson = cad_geom::polygon_to_geojson(old_poly);
    let pending_raw = pending_intersecting(args.pool, &old_geojson, row.poly_id).await?;

    let accepted_candidates = prune_candidates(accepted_raw, new_poly);
    let pending_candidates = prune_candidates(pending_raw, old_poly);

    let ctx = NeighborContext {
        accepted: accepted_candidates,
        pending: pending_candidates,
    };

    let outcome = match analyse(old_poly, new_poly, &ctx) {
        Ok(o) => o,
        Err(MatchError::Geometry(e)) => {
            collector.record_failure(
                row.poly_id,
                &row.council,
                format!("degenerate geometry in segmentation: {e}"),
                Some(comparison.percentage_intersect),
            );
            return Ok(Decision::Simple(MatchType::Fail));
        }
    };

    let decision = match outcome {
        SegmentationOutcome::BoundariesShifted => Decision::Simple(MatchType::BoundariesShifted),
        SegmentationOutcome::Merged { absorbed } => Decision::MergeSegment {
            tag: MatchType::Merged,
            absorbed,
            siblings: Vec::new(),
        },
        SegmentationOutcome::MergedIncomplete { absorbed } => Decision::MergeSegment {
            tag: MatchType::MergedIncomplete,
            absorbed,
            siblings: Vec::new(),
        },
        SegmentationOutcome::Segmented { siblings } => Decision::MergeSegment {
            tag: MatchType::Segmented,
            absorbed: Vec::new(),
            siblings,
        },
        SegmentationOutcome::SegmentedIncomplete { siblings } => Decision::MergeSegment {
            tag: MatchType::SegmentedIncomplete,
            absorbed: Vec::new(),
            siblings,
        },
        SegmentationOutcome::MergedAndSegmented { absorbed, siblings } => Decision::MergeSegment {
            tag: MatchType::MergedAndSegmented,
            absorbed,
            siblings,
        },
        SegmentationOutcome::Unresolved => {
            collector.record_failure(
                row.poly_id,
                &row.council,
                "territory changed hands but no neighbour identified",
                Some(comparison.percentage_intersect),
            );
            Decision::Simple(MatchType::Fail)
        }
    };

    if let Decision::MergeSegment {
        tag,
        absorbed,
        siblings,
    } = &decision
    {
        collector.record_merge_segment(row.poly_id, *tag, absorbed.clone(), siblings.clone());
    }

    Ok(decision)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_polygon(geojson: &serde_json::Value) -> Option<Polygon<f64>> {
    let geometry = geojson::Geometry::from_json_value(geojson.clone()).ok()?;
    cad_geom::polygon_from_geojson(&geometry.value).ok()
}

/// Parse raw candidate rows and keep the ones whose bbox intersects the
/// probe polygon.
fn prune_candidates(
    raw: Vec<(i64, serde_json::Value)>,
    probe: &Polygon<f64>,
) -> Vec<(i64, Polygon<f64>)> {
    let parsed: Vec<(i64, Polygon<f64>)> = raw
        .into_iter()
        .filter_map(|(id, gj)| parse_polygon(&gj).map(|p| (id, p)))
        .collect();

    let index = BboxIndex::build(parsed.iter().map(|(id, p)| (*id, p)));
    let keep = index.candidates(probe);

    parsed
        .into_iter()
        .filter(|(id, _)| keep.contains(id))
        .collect()
}
