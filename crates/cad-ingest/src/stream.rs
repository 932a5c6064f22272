//! Streaming GeoJSON features into the pending table.
//!
//! Per-council GeoJSONs run to hundreds of megabytes; features are consumed
//! as a lazy sequence off a blocking reader thread and flushed to the
//! database in bounded chunks, so memory is bounded by chunk size.
//!
//! The reprojection tool emits WGS84 with (latitude, longitude) axis order;
//! every vertex is reversed to (longitude, latitude) and rounded to 7
//! decimal places (~1 cm) before storage.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use geojson::FeatureReader;
use sqlx::PgPool;
use tracing::{debug, warn};

use cad_db::boundaries::pending_upsert_chunk;
use cad_db::{PendingInsert, POLYGON_CHUNK_ROWS};
use cad_geom::round_dp;

/// Outcome of streaming one council file.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamReport {
    pub features_read: u64,
    pub rows_written: u64,
    /// Features without a usable INSPIREID or geometry.
    pub skipped: u64,
}

/// Reverse a GeoJSON position to (lng, lat) and round to 7 dp.
fn fix_position(pos: &[f64]) -> Option<[f64; 2]> {
    if pos.len() < 2 {
        return None;
    }
    // Input order is (lat, lng).
    Some([round_dp(pos[1], 7), round_dp(pos[0], 7)])
}

fn fix_rings(rings: &[Vec<Vec<f64>>]) -> Option<Vec<Vec<[f64; 2]>>> {
    let mut out = Vec::with_capacity(rings.len());
    for ring in rings {
        let fixed: Option<Vec<[f64; 2]>> = ring.iter().map(|p| fix_position(p)).collect();
        let fixed = fixed?;
        if fixed.len() < 4 {
            return None;
        }
        out.push(fixed);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Extract the INSPIRE id from a feature's properties.
fn inspire_id(feature: &geojson::Feature) -> Option<i64> {
    let props = feature.properties.as_ref()?;
    match props.get("INSPIREID")? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert one feature to a pending row.  MultiPolygons are stored verbatim
/// (axis-corrected) with `simple_polygon = false`; the reconciler fails them.
pub fn feature_to_pending(feature: &geojson::Feature, council: &str) -> Option<PendingInsert> {
    let poly_id = inspire_id(feature)?;
    let geometry = feature.geometry.as_ref()?;

    let (geojson, simple_polygon) = match &geometry.value {
        geojson::Value::Polygon(rings) => {
            let fixed = fix_rings(rings)?;
            (
                serde_json::json!({ "type": "Polygon", "coordinates": fixed }),
                true,
            )
        }
        geojson::Value::MultiPolygon(polys) => {
            let fixed: Option<Vec<_>> = polys.iter().map(|rings| fix_rings(rings)).collect();
            (
                serde_json::json!({ "type": "MultiPolygon", "coordinates": fixed? }),
                false,
            )
        }
        _ => return None,
    };

    Some(PendingInsert {
        poly_id,
        council: council.to_string(),
        geojson,
        simple_polygon,
    })
}

/// Stream `geojson_path` into the pending table in [`POLYGON_CHUNK_ROWS`]
/// chunks.
pub async fn stream_council_geojson(
    pool: &PgPool,
    geojson_path: &Path,
    council: &str,
) -> Result<StreamReport> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<PendingInsert>>(2);

    let path = geojson_path.to_path_buf();
    let council_name = council.to_string();
    let parser = tokio::task::spawn_blocking(move || -> Result<(u64, u64)> {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("open geojson {}", path.display()))?;
        let reader = FeatureReader::from_reader(std::io::BufReader::new(file));

        let mut read = 0u64;
        let mut skipped = 0u64;
        let mut buf: Vec<PendingInsert> = Vec::with_capacity(POLYGON_CHUNK_ROWS);

        for feature in reader.features() {
            let feature = feature.context("geojson feature parse failed")?;
            read += 1;
            match feature_to_pending(&feature, &council_name) {
                Some(row) => {
                    buf.push(row);
                    if buf.len() >= POLYGON_CHUNK_ROWS {
                        let chunk = std::mem::take(&mut buf);
                        tx.blocking_send(chunk)
                            .map_err(|_| anyhow!("stream consumer dropped"))?;
                        buf.reserve(POLYGON_CHUNK_ROWS);
                    }
                }
                None => skipped += 1,
            }
        }
        if !buf.is_empty() {
            tx.blocking_send(buf)
                .map_err(|_| anyhow!("stream consumer dropped"))?;
        }
        Ok((read, skipped))
    });

    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        written += pending_upsert_chunk(pool, &chunk).await?;
        debug!(council, written, "pending chunk flushed");
    }

    let (read, skipped) = parser.await.context("geojson parser panicked")??;
    if skipped > 0 {
        warn!(council, skipped, "features without usable id/geometry skipped");
    }

    Ok(StreamReport {
        features_read: read,
        rows_written: written,
        skipped,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: serde_json::Value, geometry: serde_json::Value) -> geojson::Feature {
        let json = serde_json::json!({
            "type": "Feature",
            "properties": { "INSPIREID": id },
            "geometry": geometry,
        });
        geojson::Feature::from_json_value(json).unwrap()
    }

    fn lat_lng_square() -> serde_json::Value {
        // (lat, lng) order as emitted by the reprojection tool.
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [51.50000001, -0.10000004],
                [51.5, -0.099],
                [51.501, -0.099],
                [51.501, -0.1],
                [51.50000001, -0.10000004]
            ]]
        })
    }

    #[test]
    fn vertices_reversed_and_rounded() {
        let f = feature(serde_json::json!(25872882), lat_lng_square());
        let row = feature_to_pending(&f, "Camden").unwrap();
        assert_eq!(row.poly_id, 25_872_882);
        assert!(row.simple_polygon);
        assert_eq!(row.council, "Camden");

        let coords = &row.geojson["coordinates"][0];
        // First vertex: (lng, lat) with 7-dp rounding applied.
        assert_eq!(coords[0][0], -0.1);
        assert_eq!(coords[0][1], 51.5);
        assert_eq!(coords[1][0], -0.099);
        assert_eq!(coords[1][1], 51.5);
    }

    #[test]
    fn string_inspire_ids_accepted() {
        let f = feature(serde_json::json!("12345"), lat_lng_square());
        assert_eq!(feature_to_pending(&f, "X").unwrap().poly_id, 12_345);
    }

    #[test]
    fn multipolygon_kept_but_flagged_non_simple() {
        let geometry = serde_json::json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[51.5, -0.1], [51.5, -0.099], [51.501, -0.099], [51.5, -0.1]]],
                [[[51.6, -0.2], [51.6, -0.199], [51.601, -0.199], [51.6, -0.2]]]
            ]
        });
        let f = feature(serde_json::json!(99), geometry);
        let row = feature_to_pending(&f, "X").unwrap();
        assert!(!row.simple_polygon);
        assert_eq!(row.geojson["type"], "MultiPolygon");
    }

    #[test]
    fn missing_id_or_geometry_skipped() {
        let json = serde_json::json!({
            "type": "Feature",
            "properties": {},
            "geometry": lat_lng_square(),
        });
        let f = geojson::Feature::from_json_value(json).unwrap();
        assert!(feature_to_pending(&f, "X").is_none());

        let f = feature(serde_json::json!(1), serde_json::json!({
            "type": "Point", "coordinates": [51.5, -0.1]
        }));
        assert!(feature_to_pending(&f, "X").is_none());
    }

    #[test]
    fn degenerate_ring_skipped() {
        let geometry = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[51.5, -0.1], [51.5, -0.099], [51.5, -0.1]]]
        });
        let f = feature(serde_json::json!(5), geometry);
        assert!(feature_to_pending(&f, "X").is_none());
    }
}
