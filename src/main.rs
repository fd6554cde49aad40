use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use collection_sync_lib::infrastructure::{
    CollectionApiClient, FileCheckpointLog, IngestConfig, LoggingConfig, SqliteCatalogStore,
    flush_logs, init_logging_with_config,
};
use collection_sync_lib::{CatalogIngester, IngestError, IngestSettings};

#[derive(Parser, Debug)]
#[command(name = "collection-sync", version, about = "Incrementally sync a museum collection API into SQLite")]
struct Cli {
    /// TOML configuration file layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one incremental ingest
    Run(Overrides),
    /// Print the action plan without writing anything
    Plan(Overrides),
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Objects per insert batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum in-flight object requests
    #[arg(long)]
    concurrency: Option<usize>,

    /// sqlx connection string of the target database
    #[arg(long)]
    database_url: Option<String>,

    /// Issue requests as fast as the concurrency ceiling allows
    #[arg(long)]
    no_pacing: bool,
}

impl Overrides {
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.fetch_concurrency = concurrency;
        }
        if let Some(url) = &self.database_url {
            config.database_url.clone_from(url);
        }
        if self.no_pacing {
            config.pacing_enabled = false;
        }
    }
}

fn load_config(cli: &Cli, overrides: &Overrides) -> Result<IngestConfig> {
    let mut config = IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn build_ingester(config: &IngestConfig) -> Result<CatalogIngester> {
    let source = CollectionApiClient::from_ingest_config(config).context("Failed to build API client")?;
    let store = SqliteCatalogStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    let checkpoint = FileCheckpointLog::new(config.checkpoint_file.clone());

    Ok(CatalogIngester::new(
        Arc::new(source),
        Arc::new(store),
        Arc::new(checkpoint),
        IngestSettings::from_ingest_config(config),
    ))
}

async fn execute(cli: Cli) -> Result<()> {
    let overrides = match &cli.command {
        Command::Run(o) | Command::Plan(o) => o,
    };
    let config = load_config(&cli, overrides)?;
    init_logging_with_config(&LoggingConfig::from_ingest_config(&config))?;

    let ingester = build_ingester(&config).await?;

    match cli.command {
        Command::Run(_) => {
            info!("🚀 Starting collection sync into {}", config.database_url);
            let report = ingester.run().await?;
            info!(
                "Run {} finished: {} queued, {} persisted, {} skipped, {} soft-deleted",
                report.run_id,
                report.queued,
                report.persisted(),
                report.skipped(),
                report.deleted
            );
        }
        Command::Plan(_) => {
            let planned = ingester.plan().await?;
            println!("Updated since: {}", planned.since);
            println!("Objects queued: {}", planned.plan.to_insert.len());
            println!("New objects: {}", planned.plan.new_objects());
            println!("Updated objects: {}", planned.plan.to_update.len());
            println!("Deleted objects: {}", planned.plan.to_delete.len());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            if let Some(cause) = e.downcast_ref::<IngestError>().map(IngestError::root_cause) {
                error!("Root cause: {}", cause);
            }
            eprintln!("collection-sync: {:#}", e);
            ExitCode::FAILURE
        }
    };

    flush_logs();
    code
}
