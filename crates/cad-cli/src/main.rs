use anyhow::Result;
use clap::{Parser, Subcommand};

use cad_schemas::{PipelineTask, RunOptions};

#[derive(Parser)]
#[command(name = "cad")]
#[command(about = "CadDesk boundary pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Print the current INSPIRE publish month (Europe/London calendar)
    PublishMonth,

    /// Run the pipeline in the foreground
    Run {
        /// Skip tasks before this one (ownership|ingest|reconcile)
        #[arg(long)]
        start_at_task: Option<String>,

        /// Stop without running this task
        #[arg(long)]
        stop_before_task: Option<String>,

        /// Re-enter an interrupted run at its checkpoints
        #[arg(long)]
        resume: bool,

        /// Promote accepted boundaries into the serving table
        #[arg(long)]
        update_boundaries: bool,

        /// Emit per-council comparison statistics
        #[arg(long)]
        record_stats: bool,

        /// Cap on councils ingested
        #[arg(long)]
        max_councils: Option<u32>,

        /// Only councils sorting strictly after this name
        #[arg(long)]
        after_council: Option<String>,

        /// Cap on pending polygons reconciled
        #[arg(long)]
        max_polygons: Option<u64>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = cad_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = cad_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_ledger_table={} has_postgis={}",
                        s.ok, s.has_ledger_table, s.has_postgis
                    );
                }
                DbCmd::Migrate => {
                    cad_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::PublishMonth => {
            match cad_ingest::latest_publish_month(cad_ingest::today_in_london()) {
                Ok(pm) => println!("publish_month={} first_sunday={}", pm.label, pm.first_sunday),
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Run {
            start_at_task,
            stop_before_task,
            resume,
            update_boundaries,
            record_stats,
            max_councils,
            after_council,
            max_polygons,
        } => {
            let options = RunOptions {
                start_at_task: start_at_task.as_deref().map(PipelineTask::parse).transpose()?,
                stop_before_task: stop_before_task
                    .as_deref()
                    .map(PipelineTask::parse)
                    .transpose()?,
                resume,
                update_boundaries,
                record_stats,
                max_councils,
                after_council,
                max_polygons,
            };

            let config = cad_config::AppConfig::from_env()?;
            let pool = cad_db::connect_from_env().await?;
            cad_db::migrate(&pool).await?;

            let pipeline = cad_pipeline::Pipeline::new(pool, config);
            match pipeline.run_to_completion(options).await? {
                cad_pipeline::StartOutcome::Started { unique_key } => {
                    println!("run_complete unique_key={unique_key}");
                }
                cad_pipeline::StartOutcome::Busy { unique_key } => {
                    println!("run_busy unique_key={unique_key}");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
