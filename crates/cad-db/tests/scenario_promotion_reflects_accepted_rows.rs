// Promotion contract: scheduled deletions are drained out of the accepted
// set, every accepted pending row lands in (or overwrites) the accepted
// table, rejected rows are untouched, and the title link survives a
// geometry update.
//
// DB-backed test, skipped if CAD_DATABASE_URL is not set.

use anyhow::Result;
use cad_db::{boundaries, PendingInsert};
use cad_schemas::MatchType;
use cad_testkit::{geojson_of, shifted, square};

// Ids in a range no other scenario uses.
const KEEP: i64 = 9_200_000_001;
const UPDATED: i64 = 9_200_000_002;
const MERGED_AWAY: i64 = 9_200_000_003;
const REJECTED: i64 = 9_200_000_004;

#[tokio::test]
async fn promotion_applies_deletions_and_accepted_geometry() -> Result<()> {
    if std::env::var(cad_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: CAD_DATABASE_URL not set");
        return Ok(());
    }

    let pool = cad_db::testkit_db_pool().await?;

    let ids = [KEEP, UPDATED, MERGED_AWAY, REJECTED];
    for table in ["pending_boundaries", "accepted_boundaries", "pending_deletions"] {
        sqlx::query(&format!("delete from {table} where poly_id = any($1)"))
            .bind(&ids[..])
            .execute(&pool)
            .await?;
    }

    let base = square(-0.2, 51.4, 1e-3);
    let moved = shifted(&base, 5e-7, 0.0);

    // Prior month's accepted set: UPDATED and MERGED_AWAY exist, with a title
    // link on UPDATED.
    for (id, title) in [(UPDATED, Some("TT123456")), (MERGED_AWAY, None::<&str>)] {
        sqlx::query(
            r#"
            insert into accepted_boundaries (poly_id, title_no, geojson, geom)
            values ($1, $2, $3::jsonb,
                    ST_SetSRID(ST_GeomFromGeoJSON($3::text), 4326))
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(geojson_of(&base).to_string())
        .execute(&pool)
        .await?;
    }

    // This month's pending rows.
    boundaries::pending_upsert_chunk(
        &pool,
        &[
            PendingInsert {
                poly_id: KEEP,
                council: "Test Council".into(),
                geojson: geojson_of(&base),
                simple_polygon: true,
            },
            PendingInsert {
                poly_id: UPDATED,
                council: "Test Council".into(),
                geojson: geojson_of(&moved),
                simple_polygon: true,
            },
            PendingInsert {
                poly_id: REJECTED,
                council: "Test Council".into(),
                geojson: geojson_of(&base),
                simple_polygon: true,
            },
        ],
    )
    .await?;

    boundaries::pending_mark(&pool, KEEP, MatchType::NewBoundary).await?;
    boundaries::pending_mark(&pool, UPDATED, MatchType::HighOverlap).await?;
    boundaries::pending_mark(&pool, REJECTED, MatchType::Fail).await?;
    boundaries::pending_deletions_add(&pool, &[MERGED_AWAY]).await?;

    let report = boundaries::promote_accepted(&pool).await?;
    assert!(report.deleted >= 1);
    assert!(report.promoted >= 2);

    // Merged-away id is gone from the accepted set and the deletion queue.
    assert!(boundaries::accepted_lookup(&pool, MERGED_AWAY).await?.is_none());
    assert_eq!(boundaries::pending_deletions_count(&pool).await?, 0);

    // New boundary arrived.
    assert!(boundaries::accepted_lookup(&pool, KEEP).await?.is_some());

    // Updated geometry landed, title link preserved.
    let updated = boundaries::accepted_lookup(&pool, UPDATED).await?.unwrap();
    assert_eq!(updated.title_no.as_deref(), Some("TT123456"));
    assert_eq!(updated.geojson, geojson_of(&moved));

    // Rejected row never promoted.
    assert!(boundaries::accepted_lookup(&pool, REJECTED).await?.is_none());

    for table in ["pending_boundaries", "accepted_boundaries"] {
        sqlx::query(&format!("delete from {table} where poly_id = any($1)"))
            .bind(&ids[..])
            .execute(&pool)
            .await?;
    }

    Ok(())
}
