//! Run Ledger persistence.
//!
//! One row per pipeline execution.  The partial unique index
//! `uq_pipeline_runs_running` makes "at most one run is live" a database
//! guarantee; a second starter observes the violation and reports busy
//! instead of racing.
//!
//! Durability contract: every checkpoint setter here commits before the
//! caller moves on, so a crash re-does at most one pending polygon, one
//! council tail, or one ownership file.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use cad_schemas::{PipelineTask, RunStatus};

use crate::is_unique_constraint_violation;

#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub id: i64,
    pub unique_key: String,
    pub status: Option<RunStatus>,
    pub started_at: DateTime<Utc>,
    pub options: Value,
    pub last_task: Option<PipelineTask>,
    pub last_council_downloaded: Option<String>,
    pub last_poly_analysed: i64,
    pub stalled_at_poly: Option<i64>,
    pub stall_count: i32,
    pub latest_ownership_data: Option<NaiveDate>,
    pub latest_inspire_data: Option<NaiveDate>,
    pub finished_at: Option<DateTime<Utc>>,
}

fn ledger_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerRow> {
    let status: Option<String> = row.try_get("status")?;
    let last_task: Option<String> = row.try_get("last_task")?;
    Ok(LedgerRow {
        id: row.try_get("id")?,
        unique_key: row.try_get("unique_key")?,
        status: status.as_deref().map(RunStatus::parse).transpose()?,
        started_at: row.try_get("started_at")?,
        options: row.try_get("options")?,
        last_task: last_task.as_deref().map(PipelineTask::parse).transpose()?,
        last_council_downloaded: row.try_get("last_council_downloaded")?,
        last_poly_analysed: row.try_get("last_poly_analysed")?,
        stalled_at_poly: row.try_get("stalled_at_poly")?,
        stall_count: row.try_get("stall_count")?,
        latest_ownership_data: row.try_get("latest_ownership_data")?,
        latest_inspire_data: row.try_get("latest_inspire_data")?,
        finished_at: row.try_get("finished_at")?,
    })
}

const LEDGER_COLUMNS: &str = r#"
    id, unique_key, status, started_at, options, last_task,
    last_council_downloaded, last_poly_analysed, stalled_at_poly, stall_count,
    latest_ownership_data, latest_inspire_data, finished_at
"#;

// ---------------------------------------------------------------------------
// Creation / lookup
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LedgerCreateOutcome {
    Created(LedgerRow),
    /// Another row already holds status='running'.
    Busy,
}

/// Create a running ledger row, inheriting the data-date high-water marks
/// from the most recent prior run (they describe the store, not the run).
pub async fn ledger_create(
    pool: &PgPool,
    unique_key: &str,
    options: &Value,
) -> Result<LedgerCreateOutcome> {
    // High-water marks describe the local store, not one run; carry them
    // forward from the most recent row.  No race: the partial unique index
    // serialises run creation anyway.
    let (prev_ownership, prev_inspire) = match ledger_latest(pool).await? {
        Some(prev) => (prev.latest_ownership_data, prev.latest_inspire_data),
        None => (None, None),
    };

    let res = sqlx::query(&format!(
        r#"
        insert into pipeline_runs (unique_key, status, options,
                                   latest_ownership_data, latest_inspire_data)
        values ($1, 'running', $2, $3, $4)
        returning {LEDGER_COLUMNS}
        "#
    ))
    .bind(unique_key)
    .bind(options)
    .bind(prev_ownership)
    .bind(prev_inspire)
    .fetch_one(pool)
    .await;

    match res {
        Ok(row) => Ok(LedgerCreateOutcome::Created(ledger_from_row(&row)?)),
        Err(e) => {
            if is_unique_constraint_violation(&e, "uq_pipeline_runs_running") {
                return Ok(LedgerCreateOutcome::Busy);
            }
            Err(anyhow::Error::new(e).context("ledger_create failed"))
        }
    }
}

/// The currently running ledger row, if any.
pub async fn ledger_find_running(pool: &PgPool) -> Result<Option<LedgerRow>> {
    let row = sqlx::query(&format!(
        "select {LEDGER_COLUMNS} from pipeline_runs where status = 'running'"
    ))
    .fetch_optional(pool)
    .await
    .context("ledger_find_running failed")?;

    row.as_ref().map(ledger_from_row).transpose()
}

pub async fn ledger_fetch(pool: &PgPool, id: i64) -> Result<LedgerRow> {
    let row = sqlx::query(&format!(
        "select {LEDGER_COLUMNS} from pipeline_runs where id = $1"
    ))
    .bind(id)
    .fetch_one(pool)
    .await
    .context("ledger_fetch failed")?;
    ledger_from_row(&row)
}

/// The most recent ledger row by id, running or not.
pub async fn ledger_latest(pool: &PgPool) -> Result<Option<LedgerRow>> {
    let row = sqlx::query(&format!(
        "select {LEDGER_COLUMNS} from pipeline_runs order by id desc limit 1"
    ))
    .fetch_optional(pool)
    .await
    .context("ledger_latest failed")?;

    row.as_ref().map(ledger_from_row).transpose()
}

// ---------------------------------------------------------------------------
// Checkpoint setters
// ---------------------------------------------------------------------------

pub async fn ledger_set_task(pool: &PgPool, id: i64, task: PipelineTask) -> Result<()> {
    sqlx::query("update pipeline_runs set last_task = $2 where id = $1")
        .bind(id)
        .bind(task.as_str())
        .execute(pool)
        .await
        .context("ledger_set_task failed")?;
    Ok(())
}

pub async fn ledger_set_council(pool: &PgPool, id: i64, council: &str) -> Result<()> {
    sqlx::query("update pipeline_runs set last_council_downloaded = $2 where id = $1")
        .bind(id)
        .bind(council)
        .execute(pool)
        .await
        .context("ledger_set_council failed")?;
    Ok(())
}

/// Advance the per-polygon cursor.  Called after every classified row; this
/// is the durability point that bounds post-crash rework to one polygon.
pub async fn ledger_set_poly_cursor(pool: &PgPool, id: i64, poly_id: i64) -> Result<()> {
    sqlx::query("update pipeline_runs set last_poly_analysed = $2 where id = $1")
        .bind(id)
        .bind(poly_id)
        .execute(pool)
        .await
        .context("ledger_set_poly_cursor failed")?;
    Ok(())
}

pub async fn ledger_set_ownership_date(pool: &PgPool, id: i64, date: NaiveDate) -> Result<()> {
    sqlx::query("update pipeline_runs set latest_ownership_data = $2 where id = $1")
        .bind(id)
        .bind(date)
        .execute(pool)
        .await
        .context("ledger_set_ownership_date failed")?;
    Ok(())
}

pub async fn ledger_set_inspire_month(pool: &PgPool, id: i64, month: NaiveDate) -> Result<()> {
    sqlx::query("update pipeline_runs set latest_inspire_data = $2 where id = $1")
        .bind(id)
        .bind(month)
        .execute(pool)
        .await
        .context("ledger_set_inspire_month failed")?;
    Ok(())
}

/// Clear the status and stamp completion.  Used for both successful and
/// failed completion; "running" must never survive the process that owned it
/// finishing.
pub async fn ledger_finish(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query(
        r#"
        update pipeline_runs
        set status = null, finished_at = now()
        where id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .context("ledger_finish failed")?;
    Ok(())
}

/// Mark a run stopped by the operator (still resumable).
pub async fn ledger_mark_stopped(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("update pipeline_runs set status = 'stopped' where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("ledger_mark_stopped failed")?;
    Ok(())
}

/// Re-install a stopped/crashed row as running (resume path).  Fails if
/// another row is already running.
pub async fn ledger_reinstate_running(pool: &PgPool, id: i64) -> Result<()> {
    let res = sqlx::query("update pipeline_runs set status = 'running' where id = $1")
        .bind(id)
        .execute(pool)
        .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) => {
            if is_unique_constraint_violation(&e, "uq_pipeline_runs_running") {
                return Err(anyhow!("another run is already running"));
            }
            Err(anyhow::Error::new(e).context("ledger_reinstate_running failed"))
        }
    }
}

// ---------------------------------------------------------------------------
// Stall tracking (retry discipline)
// ---------------------------------------------------------------------------

/// Record that a resume is entering the reconcile loop at `cursor`.
///
/// Returns the number of consecutive resumes that have entered at this same
/// cursor.  The pipeline skips `cursor + 1` once this exceeds its maximum,
/// so one pathological geometry cannot stall the month.
pub async fn ledger_note_stall(pool: &PgPool, id: i64, cursor: i64) -> Result<i32> {
    let row = sqlx::query(
        r#"
        update pipeline_runs
        set stall_count = case
              when stalled_at_poly is not distinct from $2 then stall_count + 1
              else 1
            end,
            stalled_at_poly = $2
        where id = $1
        returning stall_count
        "#,
    )
    .bind(id)
    .bind(cursor)
    .fetch_one(pool)
    .await
    .context("ledger_note_stall failed")?;

    Ok(row.try_get("stall_count")?)
}
