//! Ownership title persistence (CCOD / OCOD).
//!
//! The change-file updater deletes then upserts in chunks; both operations
//! are idempotent so a crashed file can simply be re-applied.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

/// One registered proprietor block (a title carries up to four).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proprietor {
    pub name: String,
    pub company_no: Option<String>,
    pub category: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub address_3: Option<String>,
}

/// One title deed and its registered owners, as parsed from a CCOD/OCOD row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipRecord {
    pub title_no: String,
    pub tenure: Option<String>,
    pub property_address: Option<String>,
    pub postcode: Option<String>,
    pub district: Option<String>,
    pub county: Option<String>,
    pub region: Option<String>,
    pub price_paid: Option<i64>,
    pub proprietors: [Option<Proprietor>; 4],
    pub date_proprietor_added: Option<NaiveDate>,
    /// true for CCOD (UK companies), false for OCOD (overseas).
    pub uk_based: bool,
}

/// Truncate the ownership table (full-snapshot bootstrap only).
pub async fn ownership_truncate(pool: &PgPool) -> Result<()> {
    sqlx::query("truncate table ownership_titles")
        .execute(pool)
        .await
        .context("ownership_truncate failed")?;
    Ok(())
}

/// Delete every title in `title_nos`.  Returns the number of rows removed.
/// Missing titles are ignored (change files can delete a title this store
/// never saw).
pub async fn ownership_delete_titles(pool: &PgPool, title_nos: &[String]) -> Result<u64> {
    if title_nos.is_empty() {
        return Ok(0);
    }
    let res = sqlx::query("delete from ownership_titles where title_no = any($1)")
        .bind(title_nos)
        .execute(pool)
        .await
        .context("ownership_delete_titles failed")?;
    Ok(res.rows_affected())
}

/// Bulk-upsert one chunk of ownership records.
///
/// Binds one array per column through `unnest`, so the bind count is constant;
/// callers chunk at [`crate::OWNERSHIP_CHUNK_ROWS`] to bound memory.  Existing
/// titles are fully overwritten — a change file's `A` row is the new truth for
/// that title.
pub async fn ownership_upsert_chunk(pool: &PgPool, records: &[OwnershipRecord]) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let n = records.len();
    let mut title_no = Vec::with_capacity(n);
    let mut tenure = Vec::with_capacity(n);
    let mut property_address = Vec::with_capacity(n);
    let mut postcode = Vec::with_capacity(n);
    let mut district = Vec::with_capacity(n);
    let mut county = Vec::with_capacity(n);
    let mut region = Vec::with_capacity(n);
    let mut price_paid = Vec::with_capacity(n);
    let mut date_added = Vec::with_capacity(n);
    let mut uk_based = Vec::with_capacity(n);

    // Per-proprietor-slot columns: [name, company_no, category, addr1..3] × 4.
    let mut prop: [[Vec<Option<String>>; 6]; 4] = Default::default();

    for r in records {
        title_no.push(r.title_no.clone());
        tenure.push(r.tenure.clone());
        property_address.push(r.property_address.clone());
        postcode.push(r.postcode.clone());
        district.push(r.district.clone());
        county.push(r.county.clone());
        region.push(r.region.clone());
        price_paid.push(r.price_paid);
        date_added.push(r.date_proprietor_added);
        uk_based.push(r.uk_based);

        for (slot, cols) in prop.iter_mut().enumerate() {
            match &r.proprietors[slot] {
                Some(p) => {
                    cols[0].push(Some(p.name.clone()));
                    cols[1].push(p.company_no.clone());
                    cols[2].push(p.category.clone());
                    cols[3].push(p.address_1.clone());
                    cols[4].push(p.address_2.clone());
                    cols[5].push(p.address_3.clone());
                }
                None => {
                    for col in cols.iter_mut() {
                        col.push(None);
                    }
                }
            }
        }
    }

    let res = sqlx::query(
        r#"
        insert into ownership_titles (
          title_no, tenure, property_address, postcode, district, county, region, price_paid,
          proprietor_name_1, company_no_1, proprietor_category_1,
          proprietor_address_1_1, proprietor_address_1_2, proprietor_address_1_3,
          proprietor_name_2, company_no_2, proprietor_category_2,
          proprietor_address_2_1, proprietor_address_2_2, proprietor_address_2_3,
          proprietor_name_3, company_no_3, proprietor_category_3,
          proprietor_address_3_1, proprietor_address_3_2, proprietor_address_3_3,
          proprietor_name_4, company_no_4, proprietor_category_4,
          proprietor_address_4_1, proprietor_address_4_2, proprietor_address_4_3,
          date_proprietor_added, uk_based
        )
        select * from unnest(
          $1::text[],  $2::text[],  $3::text[],  $4::text[],  $5::text[],  $6::text[],
          $7::text[],  $8::bigint[],
          $9::text[],  $10::text[], $11::text[], $12::text[], $13::text[], $14::text[],
          $15::text[], $16::text[], $17::text[], $18::text[], $19::text[], $20::text[],
          $21::text[], $22::text[], $23::text[], $24::text[], $25::text[], $26::text[],
          $27::text[], $28::text[], $29::text[], $30::text[], $31::text[], $32::text[],
          $33::date[], $34::boolean[]
        )
        on conflict (title_no) do update set
          tenure = excluded.tenure,
          property_address = excluded.property_address,
          postcode = excluded.postcode,
          district = excluded.district,
          county = excluded.county,
          region = excluded.region,
          price_paid = excluded.price_paid,
          proprietor_name_1 = excluded.proprietor_name_1,
          company_no_1 = excluded.company_no_1,
          proprietor_category_1 = excluded.proprietor_category_1,
          proprietor_address_1_1 = excluded.proprietor_address_1_1,
          proprietor_address_1_2 = excluded.proprietor_address_1_2,
          proprietor_address_1_3 = excluded.proprietor_address_1_3,
          proprietor_name_2 = excluded.proprietor_name_2,
          company_no_2 = excluded.company_no_2,
          proprietor_category_2 = excluded.proprietor_category_2,
          proprietor_address_2_1 = excluded.proprietor_address_2_1,
          proprietor_address_2_2 = excluded.proprietor_address_2_2,
          proprietor_address_2_3 = excluded.proprietor_address_2_3,
          proprietor_name_3 = excluded.proprietor_name_3,
          company_no_3 = excluded.company_no_3,
          proprietor_category_3 = excluded.proprietor_category_3,
          proprietor_address_3_1 = excluded.proprietor_address_3_1,
          proprietor_address_3_2 = excluded.proprietor_address_3_2,
          proprietor_address_3_3 = excluded.proprietor_address_3_3,
          proprietor_name_4 = excluded.proprietor_name_4,
          company_no_4 = excluded.company_no_4,
          proprietor_category_4 = excluded.proprietor_category_4,
          proprietor_address_4_1 = excluded.proprietor_address_4_1,
          proprietor_address_4_2 = excluded.proprietor_address_4_2,
          proprietor_address_4_3 = excluded.proprietor_address_4_3,
          date_proprietor_added = excluded.date_proprietor_added,
          uk_based = excluded.uk_based,
          updated_at = now()
        "#,
    )
    .bind(&title_no)
    .bind(&tenure)
    .bind(&property_address)
    .bind(&postcode)
    .bind(&district)
    .bind(&county)
    .bind(&region)
    .bind(&price_paid)
    .bind(&prop[0][0])
    .bind(&prop[0][1])
    .bind(&prop[0][2])
    .bind(&prop[0][3])
    .bind(&prop[0][4])
    .bind(&prop[0][5])
    .bind(&prop[1][0])
    .bind(&prop[1][1])
    .bind(&prop[1][2])
    .bind(&prop[1][3])
    .bind(&prop[1][4])
    .bind(&prop[1][5])
    .bind(&prop[2][0])
    .bind(&prop[2][1])
    .bind(&prop[2][2])
    .bind(&prop[2][3])
    .bind(&prop[2][4])
    .bind(&prop[2][5])
    .bind(&prop[3][0])
    .bind(&prop[3][1])
    .bind(&prop[3][2])
    .bind(&prop[3][3])
    .bind(&prop[3][4])
    .bind(&prop[3][5])
    .bind(&date_added)
    .bind(&uk_based)
    .execute(pool)
    .await
    .context("ownership_upsert_chunk failed")?;

    Ok(res.rows_affected())
}

/// Address details for a title, used by the reconciler's geocode fallback.
#[derive(Debug, Clone)]
pub struct TitleAddress {
    pub title_no: String,
    pub property_address: Option<String>,
    pub postcode: Option<String>,
}

pub async fn ownership_address(pool: &PgPool, title_no: &str) -> Result<Option<TitleAddress>> {
    let row = sqlx::query(
        r#"
        select title_no, property_address, postcode
        from ownership_titles
        where title_no = $1
        "#,
    )
    .bind(title_no)
    .fetch_optional(pool)
    .await
    .context("ownership_address failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(TitleAddress {
        title_no: row.try_get("title_no")?,
        property_address: row.try_get("property_address")?,
        postcode: row.try_get("postcode")?,
    }))
}

pub async fn ownership_count(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from ownership_titles")
        .fetch_one(pool)
        .await
        .context("ownership_count failed")?;
    Ok(n)
}
