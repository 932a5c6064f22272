//! Boundary persistence: accepted set, pending set, scheduled deletions,
//! and the promotion bulk operation.
//!
//! The HTTP surface reads `accepted_boundaries` only; `pending_boundaries`
//! belongs to the running reconciler and is exposed to readers solely behind
//! the privileged `acceptedOnly=false` query flag.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use cad_schemas::MatchType;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AcceptedRow {
    pub poly_id: i64,
    pub title_no: Option<String>,
    pub geojson: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PendingRow {
    pub poly_id: i64,
    pub council: String,
    pub geojson: Value,
    pub accepted: bool,
    pub match_type: Option<String>,
}

/// A boundary as served by the HTTP surface (accepted or, under the
/// privileged flag, pending).
#[derive(Debug, Clone, serde::Serialize)]
pub struct BoundarySummary {
    pub poly_id: i64,
    pub title_no: Option<String>,
    pub geojson: Value,
    pub pending: bool,
}

/// New pending row streamed out of a council GeoJSON.
#[derive(Debug, Clone)]
pub struct PendingInsert {
    pub poly_id: i64,
    pub council: String,
    /// GeoJSON geometry; `Polygon` rows also populate `geom`, anything else
    /// (MultiPolygon) leaves `geom` NULL and will fail classification.
    pub geojson: Value,
    pub simple_polygon: bool,
}

/// Ownership filter for the `/boundaries` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerTypeFilter {
    All,
    UkCompanies,
    Overseas,
}

impl OwnerTypeFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(OwnerTypeFilter::All),
            "uk" => Some(OwnerTypeFilter::UkCompanies),
            "overseas" => Some(OwnerTypeFilter::Overseas),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            OwnerTypeFilter::All => "all",
            OwnerTypeFilter::UkCompanies => "uk",
            OwnerTypeFilter::Overseas => "overseas",
        }
    }
}

// ---------------------------------------------------------------------------
// Accepted set
// ---------------------------------------------------------------------------

pub async fn accepted_lookup(pool: &PgPool, poly_id: i64) -> Result<Option<AcceptedRow>> {
    let row = sqlx::query(
        r#"
        select poly_id, title_no, geojson, created_at, updated_at
        from accepted_boundaries
        where poly_id = $1
        "#,
    )
    .bind(poly_id)
    .fetch_optional(pool)
    .await
    .context("accepted_lookup failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(accepted_from_row(&row)?))
}

fn accepted_from_row(row: &sqlx::postgres::PgRow) -> Result<AcceptedRow> {
    Ok(AcceptedRow {
        poly_id: row.try_get("poly_id")?,
        title_no: row.try_get("title_no")?,
        geojson: row.try_get("geojson")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Ids (and geometry) of accepted boundaries intersecting the given GeoJSON
/// geometry, excluding `exclude_poly_id`.  Feeds the reconciler's
/// new-boundary overlap check and the merge/segment neighbour context.
pub async fn accepted_intersecting(
    pool: &PgPool,
    geojson: &Value,
    exclude_poly_id: Option<i64>,
) -> Result<Vec<(i64, Value)>> {
    let rows = sqlx::query(
        r#"
        select poly_id, geojson
        from accepted_boundaries
        where geom is not null
          and ST_Intersects(geom, ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326))
          and ($2::bigint is null or poly_id <> $2)
        "#,
    )
    .bind(geojson.to_string())
    .bind(exclude_poly_id)
    .fetch_all(pool)
    .await
    .context("accepted_intersecting failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((row.try_get("poly_id")?, row.try_get("geojson")?));
    }
    Ok(out)
}

/// Boundaries intersecting a lng/lat envelope, with the ownership-type
/// filter applied through the title link.  When `include_pending` is set
/// (privileged readers only) pending rows are appended.
pub async fn boundaries_in_envelope(
    pool: &PgPool,
    sw_lng: f64,
    sw_lat: f64,
    ne_lng: f64,
    ne_lat: f64,
    owner_filter: OwnerTypeFilter,
    include_pending: bool,
) -> Result<Vec<BoundarySummary>> {
    let rows = sqlx::query(
        r#"
        select a.poly_id, a.title_no, a.geojson
        from accepted_boundaries a
        left join ownership_titles o on o.title_no = a.title_no
        where a.geom is not null
          and ST_Intersects(a.geom, ST_MakeEnvelope($1, $2, $3, $4, 4326))
          and (
            $5 = 'all'
            or ($5 = 'uk' and o.uk_based)
            or ($5 = 'overseas' and o.uk_based = false)
          )
        order by a.poly_id
        "#,
    )
    .bind(sw_lng)
    .bind(sw_lat)
    .bind(ne_lng)
    .bind(ne_lat)
    .bind(owner_filter.as_str())
    .fetch_all(pool)
    .await
    .context("boundaries_in_envelope failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(BoundarySummary {
            poly_id: row.try_get("poly_id")?,
            title_no: row.try_get("title_no")?,
            geojson: row.try_get("geojson")?,
            pending: false,
        });
    }

    if include_pending {
        let rows = sqlx::query(
            r#"
            select poly_id, geojson
            from pending_boundaries
            where geom is not null
              and ST_Intersects(geom, ST_MakeEnvelope($1, $2, $3, $4, 4326))
            order by poly_id
            "#,
        )
        .bind(sw_lng)
        .bind(sw_lat)
        .bind(ne_lng)
        .bind(ne_lat)
        .fetch_all(pool)
        .await
        .context("boundaries_in_envelope (pending) failed")?;

        for row in rows {
            out.push(BoundarySummary {
                poly_id: row.try_get("poly_id")?,
                title_no: None,
                geojson: row.try_get("geojson")?,
                pending: true,
            });
        }
    }

    Ok(out)
}

/// Accepted boundaries by explicit id list and/or GeoJSON search area, with
/// the leasehold filter from `POST /polygons`.
pub async fn boundaries_by_ids_or_area(
    pool: &PgPool,
    poly_ids: Option<&[i64]>,
    search_area: Option<&Value>,
    include_leaseholds: bool,
) -> Result<Vec<BoundarySummary>> {
    let rows = sqlx::query(
        r#"
        select a.poly_id, a.title_no, a.geojson
        from accepted_boundaries a
        left join ownership_titles o on o.title_no = a.title_no
        where ($1::bigint[] is null or a.poly_id = any($1))
          and (
            $2::text is null
            or (a.geom is not null
                and ST_Intersects(a.geom, ST_SetSRID(ST_GeomFromGeoJSON($2::text), 4326)))
          )
          and ($3 or coalesce(o.tenure, '') <> 'Leasehold')
        order by a.poly_id
        "#,
    )
    .bind(poly_ids)
    .bind(search_area.map(|v| v.to_string()))
    .bind(include_leaseholds)
    .fetch_all(pool)
    .await
    .context("boundaries_by_ids_or_area failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(BoundarySummary {
            poly_id: row.try_get("poly_id")?,
            title_no: row.try_get("title_no")?,
            geojson: row.try_get("geojson")?,
            pending: false,
        });
    }
    Ok(out)
}

/// Accepted boundaries whose linked title names the given proprietor
/// (case-insensitive, any of the four proprietor slots).
pub async fn boundaries_by_proprietor(
    pool: &PgPool,
    proprietor_name: &str,
) -> Result<Vec<BoundarySummary>> {
    let rows = sqlx::query(
        r#"
        select a.poly_id, a.title_no, a.geojson
        from accepted_boundaries a
        join ownership_titles o on o.title_no = a.title_no
        where o.proprietor_name_1 ilike $1
           or o.proprietor_name_2 ilike $1
           or o.proprietor_name_3 ilike $1
           or o.proprietor_name_4 ilike $1
        order by a.poly_id
        "#,
    )
    .bind(proprietor_name)
    .fetch_all(pool)
    .await
    .context("boundaries_by_proprietor failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(BoundarySummary {
            poly_id: row.try_get("poly_id")?,
            title_no: row.try_get("title_no")?,
            geojson: row.try_get("geojson")?,
            pending: false,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Pending set
// ---------------------------------------------------------------------------

/// Truncate the pending table (start of a non-resumed run).
pub async fn pending_truncate(pool: &PgPool) -> Result<()> {
    sqlx::query("truncate table pending_boundaries")
        .execute(pool)
        .await
        .context("pending_truncate failed")?;
    Ok(())
}

/// Bulk-upsert one chunk of pending rows streamed from a council GeoJSON.
///
/// Upserting (rather than inserting) by `poly_id` is what makes a crashed
/// council import restartable: the partially ingested rows converge.
pub async fn pending_upsert_chunk(pool: &PgPool, rows: &[PendingInsert]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut poly_id = Vec::with_capacity(rows.len());
    let mut council = Vec::with_capacity(rows.len());
    let mut geojson = Vec::with_capacity(rows.len());
    let mut simple = Vec::with_capacity(rows.len());
    for r in rows {
        poly_id.push(r.poly_id);
        council.push(r.council.clone());
        geojson.push(r.geojson.to_string());
        simple.push(r.simple_polygon);
    }

    let res = sqlx::query(
        r#"
        insert into pending_boundaries (poly_id, council, geojson, geom)
        select
          u.poly_id,
          u.council,
          u.geojson::jsonb,
          case when u.simple
               then ST_SetSRID(ST_GeomFromGeoJSON(u.geojson), 4326)
               else null
          end
        from unnest($1::bigint[], $2::text[], $3::text[], $4::boolean[])
          as u(poly_id, council, geojson, simple)
        on conflict (poly_id) do update set
          council = excluded.council,
          geojson = excluded.geojson,
          geom = excluded.geom,
          accepted = false,
          match_type = null,
          updated_at = now()
        "#,
    )
    .bind(&poly_id)
    .bind(&council)
    .bind(&geojson)
    .bind(&simple)
    .execute(pool)
    .await
    .context("pending_upsert_chunk failed")?;

    Ok(res.rows_affected())
}

/// Next batch of pending rows in primary-key order, strictly after
/// `after_poly_id`.
pub async fn pending_after(
    pool: &PgPool,
    after_poly_id: i64,
    limit: i64,
) -> Result<Vec<PendingRow>> {
    let rows = sqlx::query(
        r#"
        select poly_id, council, geojson, accepted, match_type
        from pending_boundaries
        where poly_id > $1
        order by poly_id asc
        limit $2
        "#,
    )
    .bind(after_poly_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("pending_after failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(PendingRow {
            poly_id: row.try_get("poly_id")?,
            council: row.try_get("council")?,
            geojson: row.try_get("geojson")?,
            accepted: row.try_get("accepted")?,
            match_type: row.try_get("match_type")?,
        });
    }
    Ok(out)
}

/// Record a classification verdict on one pending row.
pub async fn pending_mark(pool: &PgPool, poly_id: i64, tag: MatchType) -> Result<()> {
    sqlx::query(
        r#"
        update pending_boundaries
        set accepted = $2, match_type = $3, updated_at = now()
        where poly_id = $1
        "#,
    )
    .bind(poly_id)
    .bind(tag.is_accepting())
    .bind(tag.as_str())
    .execute(pool)
    .await
    .context("pending_mark failed")?;
    Ok(())
}

/// Record the same verdict on a set of sibling pending rows (segmentation).
pub async fn pending_mark_many(pool: &PgPool, poly_ids: &[i64], tag: MatchType) -> Result<u64> {
    if poly_ids.is_empty() {
        return Ok(0);
    }
    let res = sqlx::query(
        r#"
        update pending_boundaries
        set accepted = $2, match_type = $3, updated_at = now()
        where poly_id = any($1)
        "#,
    )
    .bind(poly_ids)
    .bind(tag.is_accepting())
    .bind(tag.as_str())
    .execute(pool)
    .await
    .context("pending_mark_many failed")?;
    Ok(res.rows_affected())
}

/// Pending rows intersecting the given geometry, excluding one id (sibling
/// candidates for the segmentation cascade).
pub async fn pending_intersecting(
    pool: &PgPool,
    geojson: &Value,
    exclude_poly_id: i64,
) -> Result<Vec<(i64, Value)>> {
    let rows = sqlx::query(
        r#"
        select poly_id, geojson
        from pending_boundaries
        where geom is not null
          and poly_id <> $2
          and ST_Intersects(geom, ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326))
        "#,
    )
    .bind(geojson.to_string())
    .bind(exclude_poly_id)
    .fetch_all(pool)
    .await
    .context("pending_intersecting failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((row.try_get("poly_id")?, row.try_get("geojson")?));
    }
    Ok(out)
}

pub async fn pending_count(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from pending_boundaries")
        .fetch_one(pool)
        .await
        .context("pending_count failed")?;
    Ok(n)
}

/// Row counts per match type (NULL = not yet classified).
pub async fn pending_match_counts(pool: &PgPool) -> Result<Vec<(Option<String>, i64)>> {
    let rows = sqlx::query(
        r#"
        select match_type, count(*)::bigint as n
        from pending_boundaries
        group by match_type
        order by match_type
        "#,
    )
    .fetch_all(pool)
    .await
    .context("pending_match_counts failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((row.try_get("match_type")?, row.try_get("n")?));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Scheduled deletions
// ---------------------------------------------------------------------------

/// Schedule accepted ids for removal at promotion time (merged-away
/// boundaries).  Idempotent.
pub async fn pending_deletions_add(pool: &PgPool, poly_ids: &[i64]) -> Result<()> {
    if poly_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        insert into pending_deletions (poly_id)
        select * from unnest($1::bigint[])
        on conflict (poly_id) do nothing
        "#,
    )
    .bind(poly_ids)
    .execute(pool)
    .await
    .context("pending_deletions_add failed")?;
    Ok(())
}

pub async fn pending_deletions_count(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from pending_deletions")
        .fetch_one(pool)
        .await
        .context("pending_deletions_count failed")?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PromotionReport {
    pub deleted: u64,
    pub promoted: u64,
}

/// Promote the accepted pending rows into the serving table.
///
/// One transaction: drain `pending_deletions` (removing those ids from the
/// accepted set), then bulk insert-or-update every accepted pending row.
/// Geometry updates preserve the existing `title_no` link.  Until this
/// commits, readers see the previous month's boundaries only.
pub async fn promote_accepted(pool: &PgPool) -> Result<PromotionReport> {
    let mut tx = pool.begin().await.context("promotion begin failed")?;

    let deleted = sqlx::query(
        r#"
        delete from accepted_boundaries
        where poly_id in (select poly_id from pending_deletions)
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("promotion delete failed")?
    .rows_affected();

    sqlx::query("delete from pending_deletions")
        .execute(&mut *tx)
        .await
        .context("promotion drain failed")?;

    let promoted = sqlx::query(
        r#"
        insert into accepted_boundaries (poly_id, geojson, geom)
        select poly_id, geojson, geom
        from pending_boundaries
        where accepted = true
        on conflict (poly_id) do update set
          geojson = excluded.geojson,
          geom = excluded.geom,
          updated_at = now()
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("promotion upsert failed")?
    .rows_affected();

    tx.commit().await.context("promotion commit failed")?;

    Ok(PromotionReport { deleted, promoted })
}
