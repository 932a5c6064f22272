//! Postgres/PostGIS persistence for CadDesk.
//!
//! All SQL in the workspace lives in this crate.  Geometry is stored twice
//! per boundary row: the GeoJSON geometry (`jsonb`, full 7-decimal-place
//! vertex fidelity for exact comparisons) and a PostGIS `geometry` column
//! derived from it on write, which backs the spatial predicates and GIST
//! indexes.  Bulk writes bind parallel arrays through `unnest`, so each
//! statement carries a fixed bind count regardless of chunk size; chunking
//! exists to bound memory, not the protocol.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod boundaries;
pub mod ledger;
pub mod ownership;

pub use boundaries::{
    AcceptedRow, BoundarySummary, OwnerTypeFilter, PendingInsert, PendingRow, PromotionReport,
};
pub use ledger::{LedgerCreateOutcome, LedgerRow};
pub use ownership::{OwnershipRecord, Proprietor};

pub const ENV_DB_URL: &str = "CAD_DATABASE_URL";

/// Polygon rows per bulk statement.  Bounds memory per round trip; the bind
/// count is constant (unnest arrays) so this is not a protocol limit.
pub const POLYGON_CHUNK_ROWS: usize = 10_000;

/// Ownership rows per bulk statement.
pub const OWNERSHIP_CHUNK_ROWS: usize = 2_000;

/// Connect to Postgres using CAD_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using CAD_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema + PostGIS presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (has_ledger,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='pipeline_runs'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let (has_postgis,): (bool,) = sqlx::query_as::<_, (bool,)>(
        "select exists (select 1 from pg_extension where extname = 'postgis')",
    )
    .fetch_one(pool)
    .await
    .context("status postgis query failed")?;

    Ok(DbStatus {
        ok,
        has_ledger_table: has_ledger,
        has_postgis,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_ledger_table: bool,
    pub has_postgis: bool,
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || (db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint))
        }
        _ => false,
    }
}
