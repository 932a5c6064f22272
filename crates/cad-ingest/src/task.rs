//! The polygon-ingest pipeline task.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use cad_db::ledger::ledger_set_council;

use crate::archive::extract_gml;
use crate::download::ArchiveDownloader;
use crate::index::{parse_archive_index, CouncilArchive};
use crate::publish_month::PublishMonth;
use crate::reproject::reproject_to_wgs84;
use crate::stream::stream_council_geojson;
use crate::{IngestError, MIN_COUNCIL_FEATURES};

pub struct PolygonIngestArgs<'a> {
    pub pool: &'a PgPool,
    pub downloader: &'a ArchiveDownloader,
    pub ledger_id: i64,
    pub index_url: &'a str,
    /// Root data directory owning `downloads/` and `geojson/`.
    pub data_dir: &'a Path,
    pub publish_month: &'a PublishMonth,
    /// Only councils sorting strictly after this are processed (run option
    /// or resume checkpoint — the caller picks the stricter of the two).
    pub after_council: Option<&'a str>,
    pub max_councils: Option<u32>,
    /// Off-host backup destination for the zip archives; `None` skips
    /// silently.
    pub backup_dest: Option<&'a str>,
}

#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub councils_processed: u32,
    pub features_read: u64,
    pub rows_written: u64,
    pub last_council: Option<String>,
}

/// Run the polygon-ingest task to completion.
pub async fn run_polygon_ingest(args: PolygonIngestArgs<'_>) -> Result<IngestReport> {
    let month = &args.publish_month.label;
    let downloads_dir = args.data_dir.join("downloads").join(month);
    let geojson_dir = args.data_dir.join("geojson").join(month);

    purge_old_month_dirs(&args.data_dir.join("downloads"), month).await?;
    purge_old_month_dirs(&args.data_dir.join("geojson"), month).await?;

    let html = args
        .downloader
        .fetch_text(args.index_url)
        .await
        .context("fetch archive index")?;
    let councils = parse_archive_index(&html, args.index_url)?;
    info!(total = councils.len(), month, "archive index enumerated");

    let mut report = IngestReport::default();

    for council in &councils {
        if let Some(after) = args.after_council {
            if council.council.as_str() <= after {
                continue;
            }
        }
        if let Some(cap) = args.max_councils {
            if report.councils_processed >= cap {
                info!(cap, "council cap reached");
                break;
            }
        }

        let stream = ingest_one_council(&args, council, &downloads_dir, &geojson_dir).await?;

        if stream.features_read < MIN_COUNCIL_FEATURES {
            return Err(IngestError::TooFewFeatures {
                council: council.council.clone(),
                count: stream.features_read,
            }
            .into());
        }

        ledger_set_council(args.pool, args.ledger_id, &council.council).await?;

        report.councils_processed += 1;
        report.features_read += stream.features_read;
        report.rows_written += stream.rows_written;
        report.last_council = Some(council.council.clone());
    }

    backup_archives(&downloads_dir, args.backup_dest).await;

    Ok(report)
}

async fn ingest_one_council(
    args: &PolygonIngestArgs<'_>,
    council: &CouncilArchive,
    downloads_dir: &Path,
    geojson_dir: &Path,
) -> Result<crate::stream::StreamReport> {
    let zip_path = downloads_dir.join(council.zip_name());
    let geojson_path = geojson_dir.join(council.geojson_name());

    if !path_exists(&geojson_path).await {
        if !path_exists(&zip_path).await {
            args.downloader
                .fetch_to_file(&council.url, &zip_path)
                .await
                .with_context(|| format!("download archive for {}", council.council))?;
        } else {
            info!(council = %council.council, "archive already present; skipping download");
        }

        let gml_dir = downloads_dir.join("gml").join(council.zip_name().trim_end_matches(".zip"));
        let zip_for_blocking = zip_path.clone();
        let gml_dir_for_blocking = gml_dir.clone();
        let gml_path = tokio::task::spawn_blocking(move || {
            extract_gml(&zip_for_blocking, &gml_dir_for_blocking)
        })
        .await
        .context("unzip task panicked")??;

        reproject_to_wgs84(&gml_path, &geojson_path).await?;
    } else {
        info!(council = %council.council, "geojson already present; skipping transform");
    }

    let stream = stream_council_geojson(args.pool, &geojson_path, &council.council)
        .await
        .with_context(|| format!("stream council {}", council.council))?;

    info!(
        council = %council.council,
        features = stream.features_read,
        rows = stream.rows_written,
        "council ingested"
    );

    Ok(stream)
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Delete month-named sibling directories other than the current month.
async fn purge_old_month_dirs(parent: &Path, keep: &str) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(e) => e,
        Err(_) => return Ok(()), // nothing downloaded yet
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == keep || !is_month_label(name) {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            info!(dir = %entry.path().display(), "purging previous month");
            tokio::fs::remove_dir_all(entry.path()).await?;
        }
    }
    Ok(())
}

fn is_month_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// Copy the month's archives off-host.  Failures are logged, never fatal:
/// backups protect against re-downloading, not against data loss.
async fn backup_archives(downloads_dir: &Path, dest: Option<&str>) {
    let Some(dest) = dest else { return };

    let result = tokio::process::Command::new("rsync")
        .arg("-a")
        .arg(downloads_dir)
        .arg(dest)
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => {
            info!(dest, "archive backup complete");
        }
        Ok(out) => {
            warn!(
                dest,
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr),
                "archive backup failed"
            );
        }
        Err(e) => warn!(dest, error = %e, "archive backup could not start"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_labels_recognised() {
        assert!(is_month_label("2026-07"));
        assert!(!is_month_label("2026-7"));
        assert!(!is_month_label("notes"));
        assert!(!is_month_label("2026-07-05"));
    }

    #[tokio::test]
    async fn purge_removes_only_old_month_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2026-06", "2026-07", "keep-me"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        purge_old_month_dirs(dir.path(), "2026-07").await.unwrap();

        assert!(!dir.path().join("2026-06").exists());
        assert!(dir.path().join("2026-07").exists());
        assert!(dir.path().join("keep-me").exists());
    }
}
