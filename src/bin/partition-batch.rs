//! # Partition Batch CLI
//!
//! `master` runs one partitioned job and prints its result as JSON.
//! `worker` consumes work requests until Ctrl-C.
//! `validate-config` loads and validates the configuration.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use partition_batch::config::{BatchConfig, ConfigManager};
use partition_batch::database;
use partition_batch::discovery::PgKeyRangeSource;
use partition_batch::ledger::PgExecutionLedger;
use partition_batch::logging::init_structured_logging;
use partition_batch::messaging::{MessageTransport, MessagingProvider, PgmqMessagingService};
use partition_batch::orchestration::{PartitionDispatcher, PartitionedJob};
use partition_batch::runner::{CustomerMigrationRunner, StepRegistry};
use partition_batch::worker::{WorkerPool, WorkerRequestHandler};

#[derive(Parser)]
#[command(name = "partition-batch")]
#[command(about = "Partitioned batch migration over a message queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: config, or PARTITION_CONFIG_DIR)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment override (default: PARTITION_ENV, APP_ENV, development)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover partitions, dispatch them and wait for the ledger
    Master {
        /// Run database migrations before starting
        #[arg(long)]
        migrate: bool,
    },

    /// Process work requests until interrupted
    Worker {
        /// Override worker.concurrency
        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Load and validate configuration, then exit
    ValidateConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_structured_logging();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "partition-batch failed");
            eprintln!("error: {e:#}");
            2
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let manager = match &cli.environment {
        Some(env) => ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), env),
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("loading configuration")?;
    let config = manager.config().clone();

    match cli.command {
        Commands::ValidateConfig => {
            println!(
                "Configuration valid (environment: {}, directory: {})",
                manager.environment(),
                manager.config_directory().display()
            );
            println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
            Ok(0)
        }
        Commands::Master { migrate } => run_master(config, migrate).await,
        Commands::Worker { concurrency } => {
            let mut config = config;
            if let Some(concurrency) = concurrency {
                config.worker.concurrency = concurrency.max(1);
            }
            run_worker(config).await
        }
    }
}

async fn transport(pool: sqlx::PgPool, config: &BatchConfig) -> Result<Arc<MessageTransport>> {
    let pgmq = PgmqMessagingService::new_with_pool(pool).await;
    let provider = Arc::new(MessagingProvider::from(pgmq));
    let transport = Arc::new(MessageTransport::new(provider, config.queues.clone()));
    let report = transport.bootstrap().await.context("creating queues")?;
    if !report.is_healthy() {
        anyhow::bail!("queues unavailable: missing {:?}", report.missing);
    }
    Ok(transport)
}

async fn run_master(config: BatchConfig, migrate: bool) -> Result<i32> {
    let pool = database::connect(&config.database)
        .await
        .context("connecting to database")?;
    if migrate {
        database::run_migrations(&pool).await.context("running migrations")?;
    }

    let transport = transport(pool.clone(), &config).await?;
    let ledger = Arc::new(PgExecutionLedger::new(pool.clone()));
    let source = PgKeyRangeSource::from_config(pool, &config.source)?;
    let dispatcher = PartitionDispatcher::new(ledger, transport, config.job.clone());

    let result = PartitionedJob::new(source, dispatcher).run().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    info!(
        job_execution_id = result.job_execution_id,
        status = %result.status,
        rows_written = result.total_rows_written(),
        "Master finished"
    );
    Ok(if result.is_success() { 0 } else { 1 })
}

async fn run_worker(config: BatchConfig) -> Result<i32> {
    let pool = database::connect(&config.database)
        .await
        .context("connecting to database")?;
    let transport = transport(pool.clone(), &config).await?;

    let runner = CustomerMigrationRunner::from_config(pool.clone(), &config)?;
    let registry = StepRegistry::builder()
        .register(config.job.step_name.clone(), Arc::new(runner))
        .build();
    let ledger = Arc::new(PgExecutionLedger::new(pool));
    let handler = Arc::new(WorkerRequestHandler::new(ledger, registry));

    let pool = WorkerPool::new(transport, handler, config.worker.clone());
    pool.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutdown requested");
    })
    .await;
    Ok(0)
}

fn redacted(config: &BatchConfig) -> BatchConfig {
    let mut config = config.clone();
    config.database.url = config.database.sanitized_url();
    config
}
