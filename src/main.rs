//! Catalog-Mirror main entry point
//!
//! This is the command-line interface for the Catalog-Mirror catalog updater.

use anyhow::Context;
use catalog_mirror::config::{load_config_with_hash, Config};
use catalog_mirror::crawler::{run_update, UpdateSummary};
use catalog_mirror::output::{load_statistics, print_statistics, print_update_summary};
use catalog_mirror::storage::{open_store, RunCounts, RunStatus, SqliteStore, Store};
use catalog_mirror::ProgressEvent;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog-Mirror: a local mirror of a remote tool catalog
///
/// Catalog-Mirror discovers every entry of the remote catalog, fetches its
/// detail page under a global rate limit, and upserts the extracted tools and
/// install instructions into a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "catalog-mirror")]
#[command(version = "1.0.0")]
#[command(about = "A rate-limited mirror of a remote tool catalog", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Update at most this many tools (0 = all)
    #[arg(long, default_value_t = 0)]
    limit: usize,

    /// Override the run timeout from the configuration (seconds)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Validate config and show what would be updated without fetching anything
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.limit);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        let timeout = cli.timeout.unwrap_or(config.pipeline.run_timeout_secs);
        handle_update(config, &config_hash, cli.limit, Duration::from_secs(timeout)).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_mirror=info,warn"),
            1 => EnvFilter::new("catalog_mirror=debug,info"),
            2 => EnvFilter::new("catalog_mirror=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, limit: usize) {
    println!("=== Catalog-Mirror Dry Run ===\n");

    println!("Source:");
    println!("  Base URL: {}", config.source.base_url);
    println!("  Page size: {}", config.source.page_size);

    println!("\nFetcher:");
    println!(
        "  Rate limit: {}/s (burst {})",
        config.fetcher.requests_per_second, config.fetcher.burst
    );
    println!(
        "  Attempts per URL: {} (base delay {}ms)",
        config.fetcher.max_retries, config.fetcher.retry_base_delay_ms
    );
    println!("  Request timeout: {}s", config.fetcher.request_timeout_secs);

    println!("\nPipeline:");
    println!(
        "  Workers: {} listing, {} detail, {} writer",
        config.pipeline.listing_workers,
        config.pipeline.detail_workers,
        config.pipeline.writer_workers
    );
    println!(
        "  Buffers: {} results, {} instructions",
        config.pipeline.result_buffer, config.pipeline.instruction_buffer
    );
    println!("  Run timeout: {}s", config.pipeline.run_timeout_secs);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
    if limit > 0 {
        println!("✓ Would update at most {} tools", limit);
    } else {
        println!("✓ Would update every tool in the catalog");
    }
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let stats = load_statistics(&store).context("Failed to load statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main update operation
async fn handle_update(
    config: Config,
    config_hash: &str,
    limit: usize,
    timeout: Duration,
) -> anyhow::Result<()> {
    let store = open_store(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let run_id = store.begin_run(config_hash)?;
    tracing::info!(run_id, base_url = %config.source.base_url, limit, "Starting update");

    let token = CancellationToken::new();
    spawn_deadline(&token, timeout);
    spawn_interrupt_handler(&token);

    let (progress_tx, progress_rx) = mpsc::channel(32);
    let progress_task = tokio::spawn(log_progress(progress_rx));

    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let result = run_update(&config, shared, &token, limit, Some(progress_tx)).await;

    if let Err(e) = progress_task.await {
        tracing::warn!("Progress logger stopped abnormally: {}", e);
    }

    record_run(&store, run_id, &result);

    match result {
        Ok(summary) => {
            print_update_summary(&summary);
            Ok(())
        }
        Err(e) => {
            if let Some(summary) = e.partial_summary() {
                print_update_summary(summary);
            }
            tracing::error!("Update failed: {}", e);
            Err(e.into())
        }
    }
}

/// Writes the outcome of a run to `update_runs`
fn record_run(
    store: &SqliteStore,
    run_id: i64,
    result: &catalog_mirror::Result<UpdateSummary>,
) {
    let (status, counts, error) = match result {
        Ok(summary) => (RunStatus::Completed, RunCounts::from(summary), None),
        Err(e) if e.is_cancelled() => (
            RunStatus::Cancelled,
            e.partial_summary().map(RunCounts::from).unwrap_or_default(),
            Some(e.to_string()),
        ),
        Err(e) => (RunStatus::Failed, RunCounts::default(), Some(e.to_string())),
    };

    if let Err(e) = store.finish_run(run_id, status, &counts, error.as_deref()) {
        tracing::warn!(run_id, "Failed to record run outcome: {}", e);
    }
}

/// Cancels `token` once `timeout` has elapsed
fn spawn_deadline(token: &CancellationToken, timeout: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("Run timeout of {}s reached, cancelling", timeout.as_secs());
                token.cancel();
            }
        }
    });
}

/// Cancels `token` on Ctrl-C
fn spawn_interrupt_handler(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("Could not listen for Ctrl-C: {}", e);
                    return;
                }
                tracing::warn!("Interrupt received, cancelling update");
                token.cancel();
            }
        }
    });
}

async fn log_progress(mut events: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Start => tracing::info!("Discovering catalog entries"),
            ProgressEvent::Progress {
                slug,
                processed,
                total,
            } => match slug {
                Some(slug) => tracing::info!("Progress: {}/{} tools (last: {})", processed, total, slug),
                None => tracing::info!("Discovered {} tools", total),
            },
            ProgressEvent::Complete { processed, total } => {
                tracing::info!("Finished: {}/{} tools persisted", processed, total)
            }
            ProgressEvent::Error { cause } => tracing::error!("Update stopped: {}", cause),
        }
    }
}
