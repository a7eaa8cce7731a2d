use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lstats_core::TrackedEntity;
use lstats_storage::{MatchStore, MemoryMatchStore, PgMatchStore};
use lstats_sync::{
    build_canonicalizer, build_notifier, build_pipeline, derive_schema, IngestConfig, IngestScheduler, LegacyImporter,
    SweepReport,
};
use lstats_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lstats")]
#[command(about = "Match history ingestion and normalization")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the periodic ingest loop and the HTTP trigger until Ctrl-C.
    Serve,
    /// Run a single sweep and print its summary.
    Sweep {
        /// Use an in-memory store seeded from a tracked-entity fixture.
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "fixtures/tracked_entities.json")]
        entities: PathBuf,
    },
    /// Apply database migrations.
    Migrate,
    /// Freeze the field types of the stored corpus into the expected schema.
    DeriveSchema {
        #[arg(long, default_value_t = 500)]
        page_size: usize,
    },
    /// Import a JSON-lines export of historical match documents.
    ImportLegacy { path: PathBuf },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lstats=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Sweep {
        dry_run: false,
        entities: PathBuf::from("fixtures/tracked_entities.json"),
    }) {
        Commands::Serve => serve(config).await?,
        Commands::Sweep { dry_run, entities } => {
            let store: Arc<dyn MatchStore> = if dry_run {
                Arc::new(seeded_memory_store(&config, &entities)?)
            } else {
                Arc::new(connect(&config).await?)
            };
            let report = build_pipeline(&config, store)?
                .run_sweep()
                .await
                .context("sweep failed")?;
            print_sweep(&report);
        }
        Commands::Migrate => {
            connect(&config).await?.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::DeriveSchema { page_size } => {
            let store = connect(&config).await?;
            let path = config.resolve(&config.schema_path);
            let schema = derive_schema(&store, page_size, &path).await?;
            println!(
                "schema derived: records={} fingerprint={} path={}",
                schema.derived_from_records(),
                schema.fingerprint(),
                path.display()
            );
        }
        Commands::ImportLegacy { path } => {
            let store = Arc::new(connect(&config).await?);
            let canonicalizer = Arc::new(build_canonicalizer(&config)?);
            let report = LegacyImporter::new(store, canonicalizer).import_file(&path).await?;
            println!(
                "legacy import complete: processed={} stored={} duplicates={} repeated={} garbage={} drifted={} unreadable={}",
                report.processed,
                report.stored,
                report.duplicates,
                report.repeated,
                report.garbage,
                report.drifted,
                report.unreadable
            );
        }
    }

    Ok(())
}

async fn connect(config: &IngestConfig) -> Result<PgMatchStore> {
    PgMatchStore::connect(&config.database_url)
        .await
        .context("connecting to the match store")
}

fn seeded_memory_store(config: &IngestConfig, entities: &std::path::Path) -> Result<MemoryMatchStore> {
    let path = config.resolve(entities);
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let entities: Vec<TrackedEntity> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(MemoryMatchStore::with_entities(entities))
}

fn print_sweep(report: &SweepReport) {
    println!(
        "sweep complete: run_id={} entities={} stored={} duplicates={} rejected={} failed_entities={}",
        report.run_id,
        report.entities.len(),
        report.stored(),
        report.duplicates(),
        report.rejected(),
        report.failed_entities()
    );
    for outcome in &report.entities {
        if let Some(error) = &outcome.error {
            println!("  entity {} ({}): {error}", outcome.entity_id, outcome.account_id);
        }
    }
}

async fn serve(config: IngestConfig) -> Result<()> {
    let store = Arc::new(connect(&config).await?);
    let pipeline = build_pipeline(&config, store)?;
    let notifier = build_notifier(&config, false)?;
    let scheduler = IngestScheduler::new(pipeline, notifier, config.sweep_interval);

    let loop_handle = if config.scheduler_enabled {
        let scheduler = scheduler.clone();
        Some(tokio::spawn(async move { scheduler.run().await }))
    } else {
        warn!("interval sweeps disabled; only triggers will run sweeps");
        None
    };

    let mut cron = scheduler.maybe_build_cron(config.sync_cron.as_deref()).await?;
    if let Some(sched) = &cron {
        sched.start().await.context("starting cron scheduler")?;
    }

    let shutdown = {
        let scheduler = scheduler.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "listening for ctrl-c failed");
            }
            info!("shutdown requested");
            scheduler.shutdown();
        }
    };
    lstats_web::serve(&config.bind, AppState::new(scheduler.clone()), shutdown).await?;

    if let Some(sched) = cron.as_mut() {
        sched.shutdown().await.context("stopping cron scheduler")?;
    }
    if let Some(handle) = loop_handle {
        handle.await.context("ingest loop panicked")?;
    }
    info!(state = ?scheduler.state(), "ingest service stopped");
    Ok(())
}
