// End-to-end reconcile pass over the five canonical cases, without
// promotion first (accepted table untouched), then a promoting re-entry
// (accepted table reflects every accepted pending row, deletions drained,
// inspire month recorded).
//
// DB-backed test, skipped if CAD_DATABASE_URL is not set.

use anyhow::Result;
use async_trait::async_trait;
use cad_match::segmentation::SegmentationConfig;
use cad_reconcile::{
    run_polygon_reconcile, GeocodeError, Geocoder, PolygonReconcileArgs, ReconcileReport,
};
use cad_testkit::{geojson_of, jittered, shifted, square};
use chrono::NaiveDate;
use geo_types::{Point, Polygon};
use serde_json::json;

// Ids in a dedicated range; the cursor keeps every other row out of scope.
const BASE: i64 = 9_300_000_000;
const EXACT: i64 = BASE + 1;
const OFFSET: i64 = BASE + 2;
const BAD_SHIFT: i64 = BASE + 3;
const JITTER: i64 = BASE + 4;
const MOVED: i64 = BASE + 5;
const FRESH: i64 = BASE + 6;

/// Geocoder that "finds" every address at a fixed point.
struct PinnedGeocoder(Point<f64>);

#[async_trait]
impl Geocoder for PinnedGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Vec<Point<f64>>, GeocodeError> {
        Ok(vec![self.0])
    }
}

/// Spread parcels out so cases never interact spatially.
fn parcel(slot: f64) -> Polygon<f64> {
    square(-0.5 + slot * 0.01, 51.4, 1e-3)
}

async fn seed_accepted(
    pool: &sqlx::PgPool,
    poly_id: i64,
    poly: &Polygon<f64>,
    title: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into accepted_boundaries (poly_id, title_no, geojson, geom)
        values ($1, $2, $3::jsonb, ST_SetSRID(ST_GeomFromGeoJSON($3::text), 4326))
        "#,
    )
    .bind(poly_id)
    .bind(title)
    .bind(geojson_of(poly).to_string())
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_pending(pool: &sqlx::PgPool, poly_id: i64, poly: &Polygon<f64>) -> Result<()> {
    cad_db::boundaries::pending_upsert_chunk(
        pool,
        &[cad_db::PendingInsert {
            poly_id,
            council: "Test Council".to_string(),
            geojson: geojson_of(poly),
            simple_polygon: true,
        }],
    )
    .await?;
    Ok(())
}

async fn tag_of(pool: &sqlx::PgPool, poly_id: i64) -> Result<(bool, Option<String>)> {
    let rows = cad_db::boundaries::pending_after(pool, poly_id - 1, 1).await?;
    Ok((rows[0].accepted, rows[0].match_type.clone()))
}

#[tokio::test]
async fn classify_everything_then_promote_on_reentry() -> Result<()> {
    if std::env::var(cad_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: CAD_DATABASE_URL not set");
        return Ok(());
    }

    let pool = cad_db::testkit_db_pool().await?;

    let ids = [EXACT, OFFSET, BAD_SHIFT, JITTER, MOVED, FRESH];
    for table in ["pending_boundaries", "accepted_boundaries", "pending_deletions"] {
        sqlx::query(&format!("delete from {table} where poly_id = any($1)"))
            .bind(&ids[..])
            .execute(&pool)
            .await?;
    }
    sqlx::query("delete from ownership_titles where title_no = 'RECTEST1'")
        .execute(&pool)
        .await?;

    let (ledger_id,): (i64,) = sqlx::query_as(
        "insert into pipeline_runs (unique_key, options) values ($1, $2) returning id",
    )
    .bind(format!("test-reconcile-{}", std::process::id()))
    .bind(json!({}))
    .fetch_one(&pool)
    .await?;

    // Case fixtures.
    let exact = parcel(0.0);
    seed_accepted(&pool, EXACT, &exact, None).await?;
    seed_pending(&pool, EXACT, &exact).await?;

    let offset_old = parcel(1.0);
    seed_accepted(&pool, OFFSET, &offset_old, None).await?;
    seed_pending(&pool, OFFSET, &shifted(&offset_old, 9e-5, -3e-6)).await?;

    let bad_old = parcel(2.0);
    seed_accepted(&pool, BAD_SHIFT, &bad_old, None).await?;
    seed_pending(&pool, BAD_SHIFT, &shifted(&bad_old, 1e-5, -1.1e-4)).await?;

    let jitter_old = parcel(3.0);
    seed_accepted(&pool, JITTER, &jitter_old, None).await?;
    seed_pending(&pool, JITTER, &jittered(&jitter_old, 2e-6)).await?;

    // Relocated ~1 km north with a title whose address geocodes onto the new
    // location.
    let moved_old = parcel(4.0);
    let moved_new = shifted(&moved_old, 0.0, 1e-2);
    seed_accepted(&pool, MOVED, &moved_old, Some("RECTEST1")).await?;
    seed_pending(&pool, MOVED, &moved_new).await?;
    cad_db::ownership::ownership_upsert_chunk(
        &pool,
        &[cad_db::OwnershipRecord {
            title_no: "RECTEST1".to_string(),
            property_address: Some("1 Relocated Row".to_string()),
            postcode: Some("N1 1AA".to_string()),
            uk_based: true,
            ..Default::default()
        }],
    )
    .await?;

    // A brand new identifier in empty territory.
    seed_pending(&pool, FRESH, &parcel(5.0)).await?;

    let geocoder = PinnedGeocoder(cad_geom::centroid(&moved_new).unwrap());
    let analysis = tempfile::tempdir()?;
    let month = NaiveDate::from_ymd_opt(2026, 7, 5).unwrap();

    let args = |promote: bool, start_after: i64, dir: std::path::PathBuf| PolygonReconcileArgs {
        pool: &pool,
        ledger_id,
        geocoder: &geocoder,
        segmentation: SegmentationConfig::default(),
        record_stats: true,
        max_polygons: None,
        start_after,
        skip_first: false,
        analysis_dir: dir,
        promote,
        publish_month: month,
    };

    // Pass 1: classify without promoting.
    let report: ReconcileReport =
        run_polygon_reconcile(args(false, BASE, analysis.path().join("run1"))).await?;
    assert_eq!(report.processed, 6);
    assert!(report.promotion.is_none());
    assert!(!report.limited);

    assert_eq!(tag_of(&pool, EXACT).await?, (true, Some("Exact".into())));
    assert_eq!(tag_of(&pool, OFFSET).await?, (true, Some("ExactOffset".into())));
    assert_eq!(tag_of(&pool, BAD_SHIFT).await?, (false, Some("Fail".into())));
    assert_eq!(tag_of(&pool, JITTER).await?, (true, Some("HighOverlap".into())));
    assert_eq!(tag_of(&pool, MOVED).await?, (true, Some("Moved".into())));
    assert_eq!(tag_of(&pool, FRESH).await?, (true, Some("NewBoundary".into())));

    // Accepted table untouched: the moved boundary still serves its old
    // geometry, and the fresh id is absent.
    let before = cad_db::boundaries::accepted_lookup(&pool, MOVED).await?.unwrap();
    assert_eq!(before.geojson, geojson_of(&moved_old));
    assert!(cad_db::boundaries::accepted_lookup(&pool, FRESH).await?.is_none());

    // Analysis artifacts exist (stats.json included: recordStats was set).
    assert!(report.analysis_files.iter().any(|p| p.ends_with("ids.json")));
    assert!(report.analysis_files.iter().any(|p| p.ends_with("stats.json")));

    // Cursor advanced to the last row.
    let ledger = cad_db::ledger::ledger_fetch(&pool, ledger_id).await?;
    assert_eq!(ledger.last_poly_analysed, FRESH);

    // Pass 2: promoting re-entry from the recorded cursor.
    let report =
        run_polygon_reconcile(args(true, ledger.last_poly_analysed, analysis.path().join("run2")))
            .await?;
    assert_eq!(report.processed, 0, "nothing left to classify");
    assert!(report.promotion.is_some());

    let after = cad_db::boundaries::accepted_lookup(&pool, MOVED).await?.unwrap();
    assert_eq!(after.geojson, geojson_of(&moved_new));
    assert_eq!(after.title_no.as_deref(), Some("RECTEST1"), "title link preserved");

    assert!(cad_db::boundaries::accepted_lookup(&pool, FRESH).await?.is_some());

    // The failed row never reached the accepted set with new geometry.
    let failed = cad_db::boundaries::accepted_lookup(&pool, BAD_SHIFT).await?.unwrap();
    assert_eq!(failed.geojson, geojson_of(&bad_old));

    assert_eq!(cad_db::boundaries::pending_deletions_count(&pool).await?, 0);

    let ledger = cad_db::ledger::ledger_fetch(&pool, ledger_id).await?;
    assert_eq!(ledger.latest_inspire_data, Some(month));

    for table in ["pending_boundaries", "accepted_boundaries"] {
        sqlx::query(&format!("delete from {table} where poly_id = any($1)"))
            .bind(&ids[..])
            .execute(&pool)
            .await?;
    }
    sqlx::query("delete from ownership_titles where title_no = 'RECTEST1'")
        .execute(&pool)
        .await?;

    Ok(())
}
