// The pending table enforces "accepted ⇔ non-Fail tag" at the schema level:
// an accepted row with a Fail tag (or no tag) is a constraint violation, not
// a silent inconsistency.
//
// DB-backed test, skipped if CAD_DATABASE_URL is not set.

use anyhow::Result;
use cad_db::{boundaries, PendingInsert};
use cad_schemas::MatchType;
use cad_testkit::{geojson_of, london_parcel};

#[tokio::test]
async fn accepted_rows_must_carry_a_non_fail_tag() -> Result<()> {
    if std::env::var(cad_db::ENV_DB_URL).is_err() {
        eprintln!("SKIP: CAD_DATABASE_URL not set");
        return Ok(());
    }

    let pool = cad_db::testkit_db_pool().await?;
    let poly_id = 9_100_000_001_i64;

    sqlx::query("delete from pending_boundaries where poly_id = $1")
        .bind(poly_id)
        .execute(&pool)
        .await?;

    boundaries::pending_upsert_chunk(
        &pool,
        &[PendingInsert {
            poly_id,
            council: "Test Council".to_string(),
            geojson: geojson_of(&london_parcel()),
            simple_polygon: true,
        }],
    )
    .await?;

    // accepted=true with match_type='Fail' violates the CHECK.
    let res = sqlx::query(
        "update pending_boundaries set accepted = true, match_type = 'Fail' where poly_id = $1",
    )
    .bind(poly_id)
    .execute(&pool)
    .await;
    assert!(res.is_err(), "accepted Fail row must be rejected");

    // accepted=true with no tag violates the CHECK.
    let res = sqlx::query(
        "update pending_boundaries set accepted = true, match_type = null where poly_id = $1",
    )
    .bind(poly_id)
    .execute(&pool)
    .await;
    assert!(res.is_err(), "accepted untagged row must be rejected");

    // The classification helper writes consistent pairs.
    boundaries::pending_mark(&pool, poly_id, MatchType::Exact).await?;
    boundaries::pending_mark(&pool, poly_id, MatchType::Fail).await?;

    let rows = boundaries::pending_after(&pool, poly_id - 1, 1).await?;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].accepted);
    assert_eq!(rows[0].match_type.as_deref(), Some("Fail"));

    sqlx::query("delete from pending_boundaries where poly_id = $1")
        .bind(poly_id)
        .execute(&pool)
        .await?;

    Ok(())
}
