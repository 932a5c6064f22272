//! The pipeline runner: ledger lifecycle + task dispatch.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};

use cad_config::AppConfig;
use cad_db::ledger::{
    ledger_create, ledger_find_running, ledger_finish, ledger_note_stall,
    ledger_reinstate_running, ledger_set_task,
};
use cad_db::{LedgerCreateOutcome, LedgerRow};
use cad_ingest::{latest_publish_month, today_in_london, ArchiveDownloader, PublishMonth};
use cad_match::segmentation::SegmentationConfig;
use cad_ownership::{HttpCatalogue, OwnershipUpdateArgs};
use cad_reconcile::{Geocoder, HttpGeocoder, NullGeocoder, PolygonReconcileArgs};
use cad_schemas::{PipelineTask, RunOptions};

use crate::notify::Notifier;
use crate::MAX_STALLED_RESUMES;

/// Outcome of a start request.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A run was created (or re-installed) and is executing.
    Started { unique_key: String },
    /// The ledger already shows a running row.
    Busy { unique_key: String },
}

/// The pipeline owner: one per process.
#[derive(Clone)]
pub struct Pipeline {
    pool: PgPool,
    config: Arc<AppConfig>,
}

impl Pipeline {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// Start (or resume) a run and execute it on a background task.
    ///
    /// The ledger row is installed synchronously, so the busy/started answer
    /// is authoritative; the tasks themselves run detached.
    pub async fn launch(&self, options: RunOptions) -> Result<StartOutcome> {
        let ledger = match self.install_run(&options).await? {
            InstallOutcome::Installed(row) => row,
            InstallOutcome::Busy(key) => return Ok(StartOutcome::Busy { unique_key: key }),
        };

        let unique_key = ledger.unique_key.clone();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.execute(ledger, options).await {
                error!(error = ?e, "pipeline run failed");
            }
        });

        Ok(StartOutcome::Started { unique_key })
    }

    /// Start a run and wait for it to finish (CLI path).
    pub async fn run_to_completion(&self, options: RunOptions) -> Result<StartOutcome> {
        let ledger = match self.install_run(&options).await? {
            InstallOutcome::Installed(row) => row,
            InstallOutcome::Busy(key) => return Ok(StartOutcome::Busy { unique_key: key }),
        };
        let unique_key = ledger.unique_key.clone();
        self.execute(ledger, options).await?;
        Ok(StartOutcome::Started { unique_key })
    }

    /// Startup resumption: if a ledger row is still marked running, the
    /// previous process died mid-run.  Re-enter it with its stored options
    /// and `resume = true`.
    pub async fn resume_interrupted(&self) -> Result<Option<String>> {
        let Some(row) = ledger_find_running(&self.pool).await? else {
            return Ok(None);
        };

        let mut options: RunOptions = serde_json::from_value(row.options.clone())
            .context("stored run options no longer parse")?;
        options.resume = true;

        warn!(
            unique_key = %row.unique_key,
            "interrupted run found at startup; resuming"
        );

        let key = row.unique_key.clone();
        let this = self.clone();
        let opts = options.clone();
        tokio::spawn(async move {
            if let Err(e) = this.execute(row, opts).await {
                error!(error = ?e, "resumed pipeline run failed");
            }
        });

        Ok(Some(key))
    }

    // -----------------------------------------------------------------------
    // Ledger installation
    // -----------------------------------------------------------------------

    async fn install_run(&self, options: &RunOptions) -> Result<InstallOutcome> {
        if options.resume {
            // Resume targets the running row (crash/stop) and honours the
            // options of *this* request — a resumed run may e.g. switch
            // updateBoundaries on for the promotion pass.
            let target = match ledger_find_running(&self.pool).await? {
                Some(row) => row,
                None => cad_db::ledger::ledger_latest(&self.pool)
                    .await?
                    .ok_or_else(|| anyhow!("resume requested but no prior run exists"))?,
            };

            if target.status.is_none() || target.status == Some(cad_schemas::RunStatus::Stopped) {
                ledger_reinstate_running(&self.pool, target.id).await?;
            }

            let options_json = serde_json::to_value(options).context("serialize run options")?;
            sqlx::query("update pipeline_runs set options = $2 where id = $1")
                .bind(target.id)
                .bind(&options_json)
                .execute(&self.pool)
                .await
                .context("update resumed run options")?;

            let row = cad_db::ledger::ledger_fetch(&self.pool, target.id).await?;
            return Ok(InstallOutcome::Installed(row));
        }

        let options_json = serde_json::to_value(options).context("serialize run options")?;
        let started = Utc::now();
        let key_material = serde_json::json!({
            "options": options_json,
            "startedAt": started.to_rfc3339(),
        });
        let unique_key = cad_config::canonical_hash(&key_material)[..16].to_string();

        match ledger_create(&self.pool, &unique_key, &options_json).await? {
            LedgerCreateOutcome::Created(row) => {
                // A fresh (non-resumed) run owns a fresh pending set.
                cad_db::boundaries::pending_truncate(&self.pool).await?;
                Ok(InstallOutcome::Installed(row))
            }
            LedgerCreateOutcome::Busy => {
                let running = ledger_find_running(&self.pool)
                    .await?
                    .map(|r| r.unique_key)
                    .unwrap_or_default();
                Ok(InstallOutcome::Busy(running))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute(&self, ledger: LedgerRow, options: RunOptions) -> Result<()> {
        let notifier = Notifier::new(self.config.webhook_url.clone());
        let result = self.run_tasks(&ledger, &options).await;

        match &result {
            Ok(summary) => {
                // Success clears the status; the run is over.
                ledger_finish(&self.pool, ledger.id).await?;
                notifier
                    .send(&format!(
                        "pipeline run {} complete\n{}",
                        ledger.unique_key, summary
                    ))
                    .await;
            }
            Err(e) => {
                // The status stays 'running' so the next start (or process
                // restart) resumes at the recorded checkpoints.
                notifier
                    .send(&format!(
                        "pipeline run {} failed (resumable): {e:#}",
                        ledger.unique_key
                    ))
                    .await;
            }
        }

        result.map(|_| ())
    }

    async fn run_tasks(&self, ledger: &LedgerRow, options: &RunOptions) -> Result<String> {
        let publish_month = self.resolve_publish_month(options)?;
        let mut summary = String::new();

        for task in PipelineTask::ALL {
            if !options.includes_task(task) {
                continue;
            }
            if options.resume && task_already_done(ledger, task) {
                info!(task = task.as_str(), "task already complete; skipping");
                continue;
            }

            info!(task = task.as_str(), "task starting");
            match task {
                PipelineTask::OwnershipUpdate => {
                    let report = self.run_ownership(ledger).await?;
                    summary.push_str(&format!(
                        "ownership: {} files, {} upserts, {} deletes\n",
                        report.files_applied, report.rows_upserted, report.rows_deleted
                    ));
                }
                PipelineTask::PolygonIngest => {
                    let report = self.run_ingest(ledger, options, &publish_month).await?;
                    summary.push_str(&format!(
                        "ingest: {} councils, {} polygons\n",
                        report.councils_processed, report.rows_written
                    ));
                }
                PipelineTask::PolygonReconcile => {
                    let report = self.run_reconcile(ledger, options, &publish_month).await?;
                    summary.push_str(&report.summary.to_table());
                }
            }
            ledger_set_task(&self.pool, ledger.id, task).await?;
        }

        Ok(summary)
    }

    async fn run_ownership(
        &self,
        ledger: &LedgerRow,
    ) -> Result<cad_ownership::OwnershipUpdateReport> {
        let api_key = self
            .config
            .ownership_api_key
            .clone()
            .ok_or_else(|| anyhow!("CAD_OWNERSHIP_API_KEY is required for the ownership task"))?;
        let catalogue = HttpCatalogue::new(self.config.ownership_api_url.clone(), api_key);

        cad_ownership::run_ownership_update(OwnershipUpdateArgs {
            pool: &self.pool,
            catalogue: &catalogue,
            ledger_id: ledger.id,
            latest_ownership_data: ledger.latest_ownership_data,
            work_dir: self.config.data_dir.join("downloads").join("ownership"),
        })
        .await
    }

    async fn run_ingest(
        &self,
        ledger: &LedgerRow,
        options: &RunOptions,
        publish_month: &PublishMonth,
    ) -> Result<cad_ingest::IngestReport> {
        let downloader = ArchiveDownloader::new();

        // The stricter of the run option and the resume checkpoint.
        let after_opt = options.after_council.as_deref();
        let after_resume = if options.resume {
            ledger.last_council_downloaded.as_deref()
        } else {
            None
        };
        let after_council = match (after_opt, after_resume) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        cad_ingest::run_polygon_ingest(cad_ingest::PolygonIngestArgs {
            pool: &self.pool,
            downloader: &downloader,
            ledger_id: ledger.id,
            index_url: &self.config.inspire_index_url,
            data_dir: &self.config.data_dir,
            publish_month,
            after_council,
            max_councils: options.max_councils,
            backup_dest: self.config.backup_dest.as_deref(),
        })
        .await
    }

    async fn run_reconcile(
        &self,
        ledger: &LedgerRow,
        options: &RunOptions,
        publish_month: &PublishMonth,
    ) -> Result<cad_reconcile::ReconcileReport> {
        let geocoder: Box<dyn Geocoder> = match &self.config.geocoder_api_key {
            Some(key) => Box::new(HttpGeocoder::new(self.config.geocoder_url.clone(), key.clone())),
            None => Box::new(NullGeocoder),
        };

        // Stall discipline: count resumes entering at the same cursor; past
        // the limit, the next row is stepped over with a warning.
        let mut skip_first = false;
        if options.resume {
            let stalls =
                ledger_note_stall(&self.pool, ledger.id, ledger.last_poly_analysed).await?;
            if stalls > MAX_STALLED_RESUMES {
                warn!(
                    cursor = ledger.last_poly_analysed,
                    stalls, "repeated stalls; the next pending row will be skipped"
                );
                skip_first = true;
            }
        }

        let run_label = format!(
            "{}_{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            ledger.unique_key
        );

        cad_reconcile::run_polygon_reconcile(PolygonReconcileArgs {
            pool: &self.pool,
            ledger_id: ledger.id,
            geocoder: geocoder.as_ref(),
            segmentation: SegmentationConfig::default(),
            record_stats: options.record_stats,
            max_polygons: options.max_polygons,
            start_after: ledger.last_poly_analysed,
            skip_first,
            analysis_dir: self.config.analysis_dir(&run_label),
            promote: options.update_boundaries && !options.is_limited(),
            publish_month: publish_month.first_sunday,
        })
        .await
    }

    /// The publish month governing this run.  On publish day the Ingestor
    /// refuses outright; a run that skips ingestion stamps the previous
    /// month instead (today's data is not in the store).
    fn resolve_publish_month(&self, options: &RunOptions) -> Result<PublishMonth> {
        let today = today_in_london();
        match latest_publish_month(today) {
            Ok(pm) => Ok(pm),
            Err(e) => {
                if options.includes_task(PipelineTask::PolygonIngest) {
                    Err(anyhow::Error::new(e).context("polygon ingest refused"))
                } else {
                    let yesterday = today
                        .pred_opt()
                        .ok_or_else(|| anyhow!("calendar underflow"))?;
                    latest_publish_month(yesterday)
                        .map_err(|e| anyhow!("publish month unresolvable: {e}"))
                }
            }
        }
    }
}

enum InstallOutcome {
    Installed(LedgerRow),
    Busy(String),
}

/// On resume, tasks at or before the recorded `last_task` are complete.
fn task_already_done(ledger: &LedgerRow, task: PipelineTask) -> bool {
    match ledger.last_task {
        Some(done) => task.index() <= done.index(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_last_task(last: Option<PipelineTask>) -> LedgerRow {
        LedgerRow {
            id: 1,
            unique_key: "k".into(),
            status: Some(cad_schemas::RunStatus::Running),
            started_at: Utc::now(),
            options: serde_json::json!({}),
            last_task: last,
            last_council_downloaded: None,
            last_poly_analysed: 0,
            stalled_at_poly: None,
            stall_count: 0,
            latest_ownership_data: None,
            latest_inspire_data: None,
            finished_at: None,
        }
    }

    #[test]
    fn completed_tasks_skip_on_resume() {
        let ledger = ledger_with_last_task(Some(PipelineTask::PolygonIngest));
        assert!(task_already_done(&ledger, PipelineTask::OwnershipUpdate));
        assert!(task_already_done(&ledger, PipelineTask::PolygonIngest));
        assert!(!task_already_done(&ledger, PipelineTask::PolygonReconcile));

        let fresh = ledger_with_last_task(None);
        assert!(!task_already_done(&fresh, PipelineTask::OwnershipUpdate));
    }
}
