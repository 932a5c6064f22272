//! The ownership-update pipeline task.
//!
//! Contract (resumable, idempotent):
//! - `latest_ownership_data` NULL ⇒ truncate and apply the earliest full
//!   snapshots (Nov 2017) for both datasets first.
//! - Apply every change file published strictly after the high-water mark in
//!   ascending publication-date order, deletions before upserts.
//! - After each distinct date completes, write the date back to the ledger;
//!   a rerun skips everything at or before it.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{info, warn};

use cad_db::ledger::ledger_set_ownership_date;
use cad_db::ownership::{
    ownership_delete_titles, ownership_truncate, ownership_upsert_chunk,
};
use cad_db::{OwnershipRecord, OWNERSHIP_CHUNK_ROWS};

use crate::catalogue::{ChangeFileKind, ChangeFileMeta, OwnershipCatalogue};
use crate::change_file::{parse_change_file, parse_snapshot_file};

pub struct OwnershipUpdateArgs<'a> {
    pub pool: &'a PgPool,
    pub catalogue: &'a dyn OwnershipCatalogue,
    pub ledger_id: i64,
    pub latest_ownership_data: Option<NaiveDate>,
    /// Scratch directory for downloaded CSVs.
    pub work_dir: PathBuf,
}

#[derive(Debug, Default, Clone)]
pub struct OwnershipUpdateReport {
    pub snapshot_applied: bool,
    pub files_applied: u32,
    pub rows_upserted: u64,
    pub rows_deleted: u64,
    pub latest: Option<NaiveDate>,
}

/// Run the ownership-update task to completion.
pub async fn run_ownership_update(
    args: OwnershipUpdateArgs<'_>,
) -> Result<OwnershipUpdateReport> {
    let mut report = OwnershipUpdateReport {
        latest: args.latest_ownership_data,
        ..Default::default()
    };

    let mut files = Vec::new();
    for kind in [ChangeFileKind::Ccod, ChangeFileKind::Ocod] {
        files.extend(
            args.catalogue
                .list_files(kind)
                .await
                .with_context(|| format!("list {} catalogue failed", kind.as_str()))?,
        );
    }

    if report.latest.is_none() {
        let snapshot_date = apply_bootstrap_snapshots(&args, &files, &mut report).await?;
        ledger_set_ownership_date(args.pool, args.ledger_id, snapshot_date).await?;
        report.latest = Some(snapshot_date);
        report.snapshot_applied = true;
    }

    let floor = report.latest.expect("set by bootstrap or caller");

    // Change files strictly newer than the high-water mark, date order.
    let mut changes: Vec<&ChangeFileMeta> = files
        .iter()
        .filter(|f| !f.full_snapshot && f.published > floor)
        .collect();
    changes.sort_by_key(|f| (f.published, f.kind.as_str()));

    let mut idx = 0;
    while idx < changes.len() {
        let date = changes[idx].published;

        // Every file sharing this publication date completes before the
        // ledger advances; a crash mid-date re-applies the whole date, which
        // is safe because delete + upsert converge.
        while idx < changes.len() && changes[idx].published == date {
            let meta = changes[idx];
            apply_change_file(&args, meta, &mut report).await?;
            report.files_applied += 1;
            idx += 1;
        }

        ledger_set_ownership_date(args.pool, args.ledger_id, date).await?;
        report.latest = Some(date);
        info!(%date, "ownership change files applied");
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Bootstrap snapshot
// ---------------------------------------------------------------------------

async fn apply_bootstrap_snapshots(
    args: &OwnershipUpdateArgs<'_>,
    files: &[ChangeFileMeta],
    report: &mut OwnershipUpdateReport,
) -> Result<NaiveDate> {
    let mut snapshot_date = None;
    let mut snapshots = Vec::new();
    for kind in [ChangeFileKind::Ccod, ChangeFileKind::Ocod] {
        let meta = files
            .iter()
            .filter(|f| f.kind == kind && f.full_snapshot)
            .min_by_key(|f| f.published)
            .ok_or_else(|| anyhow!("no full snapshot listed for {}", kind.as_str()))?;
        snapshot_date = Some(snapshot_date.map_or(meta.published, |d: NaiveDate| d.max(meta.published)));
        snapshots.push(meta.clone());
    }

    info!("ownership store empty; applying full snapshots");
    ownership_truncate(args.pool).await?;

    for meta in &snapshots {
        let dest = args
            .work_dir
            .join(format!("snapshot_{}.csv", meta.kind.as_str()));
        args.catalogue
            .download_to(meta, &dest)
            .await
            .with_context(|| format!("download snapshot {}", meta.kind.as_str()))?;

        report.rows_upserted += stream_snapshot_into_db(args.pool, &dest, meta.kind).await?;
    }

    Ok(snapshot_date.expect("both kinds present"))
}

/// Parse a snapshot file on a blocking thread and upsert chunks as they
/// arrive.  The bounded channel applies back-pressure so memory stays at a
/// few chunks regardless of snapshot size.
async fn stream_snapshot_into_db(
    pool: &PgPool,
    path: &Path,
    kind: ChangeFileKind,
) -> Result<u64> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<OwnershipRecord>>(2);

    let parse_path = path.to_path_buf();
    let uk_based = kind.uk_based();
    let parser = tokio::task::spawn_blocking(move || -> Result<u64> {
        let file = std::fs::File::open(&parse_path)
            .with_context(|| format!("open snapshot {}", parse_path.display()))?;
        let mut buf: Vec<OwnershipRecord> = Vec::with_capacity(OWNERSHIP_CHUNK_ROWS);
        let n = parse_snapshot_file(file, uk_based, |record| {
            buf.push(record);
            if buf.len() >= OWNERSHIP_CHUNK_ROWS {
                let chunk = std::mem::take(&mut buf);
                tx.blocking_send(chunk)
                    .map_err(|_| anyhow!("snapshot consumer dropped"))?;
                buf.reserve(OWNERSHIP_CHUNK_ROWS);
            }
            Ok(())
        })
        .map_err(|e| anyhow!("parse snapshot failed: {e}"))?;
        if !buf.is_empty() {
            tx.blocking_send(buf)
                .map_err(|_| anyhow!("snapshot consumer dropped"))?;
        }
        Ok(n)
    });

    let mut upserted = 0u64;
    while let Some(chunk) = rx.recv().await {
        upserted += ownership_upsert_chunk(pool, &chunk).await?;
    }

    let parsed = parser.await.context("snapshot parser panicked")??;
    if parsed != upserted {
        // Duplicate title numbers inside one chunk collapse in the upsert;
        // worth a warning, not a failure.
        warn!(parsed, upserted, "snapshot row count differs from upserted count");
    }

    Ok(upserted)
}

// ---------------------------------------------------------------------------
// Change files
// ---------------------------------------------------------------------------

async fn apply_change_file(
    args: &OwnershipUpdateArgs<'_>,
    meta: &ChangeFileMeta,
    report: &mut OwnershipUpdateReport,
) -> Result<()> {
    let dest = args.work_dir.join(format!(
        "{}_{}.csv",
        meta.kind.as_str(),
        meta.published
    ));
    args.catalogue
        .download_to(meta, &dest)
        .await
        .with_context(|| format!("download change file {}", dest.display()))?;

    let uk_based = meta.kind.uk_based();
    let parse_path = dest.clone();
    let set = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&parse_path)
            .with_context(|| format!("open change file {}", parse_path.display()))?;
        parse_change_file(file, uk_based).map_err(|e| anyhow!("parse change file failed: {e}"))
    })
    .await
    .context("change-file parser panicked")??;

    if set.skipped > 0 {
        warn!(
            file = %dest.display(),
            skipped = set.skipped,
            "change rows without usable indicator dropped"
        );
    }

    // Deletions first, then additions, per the dataset contract.
    report.rows_deleted += ownership_delete_titles(args.pool, &set.deletions).await?;
    for chunk in set.additions.chunks(OWNERSHIP_CHUNK_ROWS) {
        report.rows_upserted += ownership_upsert_chunk(args.pool, chunk).await?;
    }

    info!(
        kind = meta.kind.as_str(),
        date = %meta.published,
        additions = set.additions.len(),
        deletions = set.deletions.len(),
        "change file applied"
    );

    Ok(())
}
