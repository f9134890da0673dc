//! Prodsync Ingest - resumable product feed ingestion

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prodsync_common::logging::{init_logging, LogConfig, LogLevel};
use prodsync_ingest::config::DEFAULT_SOURCE;
use prodsync_ingest::{
    CheckpointStore, IngestConfig, IngestOrchestrator, QuarantineStore, RateLimitedFetcher,
    SourceConfig, SqliteStore, TokioClock,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "prodsync-ingest")]
#[command(author, version, about = "Resumable third-party product feed ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest pages from a source, resuming from its checkpoint
    Run {
        /// Source name (selects INGEST_BASE_URL_<SOURCE>)
        #[arg(short, long, env = "INGEST_SOURCE", default_value = DEFAULT_SOURCE)]
        source: String,

        /// Start from page 1 instead of the stored checkpoint
        #[arg(long)]
        no_resume: bool,
    },

    /// Show the stored checkpoint for a source
    Status {
        #[arg(short, long, env = "INGEST_SOURCE", default_value = DEFAULT_SOURCE)]
        source: String,
    },

    /// Show recently quarantined items for a source
    Quarantine {
        #[arg(short, long, env = "INGEST_SOURCE", default_value = DEFAULT_SOURCE)]
        source: String,

        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("prodsync-ingest")
        .build()
        .merge_env()
        .context("Invalid logging configuration")?;

    let _log_guard = init_logging(&log_config).context("Failed to initialize logging")?;

    match cli.command {
        Command::Run { source, no_resume } => {
            let config = IngestConfig::from_env().context("Invalid ingestion configuration")?;
            run(config, &source, !no_resume).await
        },
        Command::Status { source } => {
            let config = IngestConfig::storage_from_env().context("Invalid storage configuration")?;
            status(config, &source).await
        },
        Command::Quarantine { source, limit } => {
            let config = IngestConfig::storage_from_env().context("Invalid storage configuration")?;
            quarantine(config, &source, limit).await
        },
    }
}

/// Exit status after a second interrupt (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

/// Cancel `cancel` on the first signal. Returns `true` once a second signal
/// arrives, `false` if listening fails.
async fn watch_interrupts<F, Fut>(cancel: CancellationToken, mut next_signal: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        warn!(error = %e, "Cannot listen for interrupts");
        return false;
    }
    warn!("Interrupt received, stopping after the current page (interrupt again to abort)");
    cancel.cancel();

    if let Err(e) = next_signal().await {
        warn!(error = %e, "Cannot listen for interrupts");
        return false;
    }
    warn!("Second interrupt received, aborting");
    true
}

fn open_store(config: &IngestConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::new(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    Ok(Arc::new(store))
}

async fn run(config: IngestConfig, source_name: &str, resume: bool) -> Result<()> {
    let source = SourceConfig::from_env(source_name)?;
    let store = open_store(&config)?;
    let clock = Arc::new(TokioClock);

    let fetcher = RateLimitedFetcher::new(&source, &config, clock.clone())
        .context("Failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(on_signal, tokio::signal::ctrl_c).await {
            std::process::exit(FORCED_EXIT_CODE);
        }
    });

    let orchestrator = IngestOrchestrator::new(config, fetcher, store.clone(), store, clock)
        .with_cancellation(cancel);

    info!(source = %source.name, base_url = %source.base_url, resume, "Starting ingestion");

    let report = orchestrator
        .run(&source.name, resume)
        .await
        .with_context(|| format!("Ingestion run for source '{}' failed", source.name))?;

    println!("Run {}", report.run_id);
    println!("  halt:            {}", report.halt);
    println!("  checkpoint:      {}", report.checkpoint);
    println!("  pages:           {} (started at {})", report.pages_processed, report.start_page);
    println!("  last page:       {}", report.last_page);
    println!("  items seen:      {}", report.items_seen);
    println!("  accepted:        {}", report.items_accepted);
    println!("  quarantined:     {}", report.items_quarantined);
    if report.quarantine_failures > 0 {
        println!("  dropped records: {}", report.quarantine_failures);
    }

    Ok(())
}

async fn status(config: IngestConfig, source: &str) -> Result<()> {
    let store = open_store(&config)?;
    let name = config.checkpoint_name(source);

    match store.get(&name).await? {
        Some(checkpoint) => {
            println!("Checkpoint {}", checkpoint.name);
            println!("  last page:      {}", checkpoint.last_page);
            match checkpoint.last_processed_at {
                Some(at) => println!("  last processed: {}", at.to_rfc3339()),
                None => println!("  last processed: never"),
            }
            println!("  meta:           {}", checkpoint.meta);
        },
        None => println!("No checkpoint for source '{}' ({})", source, name),
    }

    let quarantined = store.count(source).await?;
    println!("  quarantined:    {}", quarantined);

    Ok(())
}

async fn quarantine(config: IngestConfig, source: &str, limit: usize) -> Result<()> {
    let store = open_store(&config)?;

    let total = store.count(source).await?;
    let records = store.list(source, limit).await?;

    println!(
        "Quarantine for source '{}': {} record(s), showing {}",
        source,
        total,
        records.len()
    );

    for record in records {
        println!(
            "#{} page={} external_id={} at={}",
            record.id.unwrap_or_default(),
            record.page,
            record.external_id.as_deref().unwrap_or("-"),
            record.created_at.to_rfc3339()
        );
        println!("  errors:  {}", serde_json::to_string(&record.errors)?);
        println!("  payload: {}", record.payload);
    }

    Ok(())
}
