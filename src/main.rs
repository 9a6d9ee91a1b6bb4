//! Manifest-Mirror main entry point
//!
//! This is the command-line interface for the Manifest-Mirror crawler.

use clap::Parser;
use manifest_mirror::config::{load_config_with_hash, Config};
use manifest_mirror::crawler::crawl;
use manifest_mirror::output::{print_statistics, LocalSnapshotWriter};
use manifest_mirror::state::RunStatus;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Manifest-Mirror: a quota-aware manifest tree mirror
///
/// Manifest-Mirror walks a remote publisher / package / version tree of
/// manifest documents under strict rate limits, merges each package into a
/// canonical record, and writes a sharded snapshot with periodic checkpoints.
#[derive(Parser, Debug)]
#[command(name = "manifest-mirror")]
#[command(version = "1.0.0")]
#[command(about = "A quota-aware manifest tree mirror", long_about = None)]
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

    /// Continue from the last checkpoint in the snapshot directory
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    resume: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics of the existing snapshot and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config).await?;
    } else {
        handle_crawl(&config, &config_hash, cli.resume).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("manifest_mirror=info,warn"),
            1 => EnvFilter::new("manifest_mirror=debug,info"),
            2 => EnvFilter::new("manifest_mirror=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Manifest-Mirror Dry Run ===\n");

    println!("Remote:");
    println!("  API base: {}", config.remote.api_base);
    println!("  Root path: {}", config.remote.root_path);
    println!("  Page size: {}", config.remote.page_size);
    println!(
        "  Bearer token: {}",
        if config.remote.resolve_token().is_some() {
            "configured"
        } else {
            "none"
        }
    );

    println!("\nFetcher:");
    println!("  Min request delay: {}ms", config.fetcher.min_request_delay);
    println!("  Low-water mark: {}", config.fetcher.low_water_mark);
    println!("  Quota safety margin: {}ms", config.fetcher.quota_safety_margin);
    println!(
        "  Quota cool-down: {}ms (max {} retries)",
        config.fetcher.quota_cooldown, config.fetcher.max_quota_retries
    );
    println!(
        "  Max attempts: {} (backoff base {}ms)",
        config.fetcher.max_retries, config.fetcher.backoff_base
    );
    println!("  Request timeout: {}s", config.fetcher.request_timeout);

    println!("\nCrawler:");
    println!("  Publishers per batch: {}", config.crawler.concurrency);
    println!("  Package delay: {}ms", config.crawler.package_delay);
    println!(
        "  Checkpoint every: {} batches",
        config.crawler.checkpoint_interval
    );
    match config.crawler.max_run_time {
        Some(seconds) => println!("  Max run time: {}s", seconds),
        None => println!("  Max run time: unlimited"),
    }
    match config.crawler.max_publishers {
        Some(limit) => println!("  Max publishers: {}", limit),
        None => println!("  Max publishers: unlimited"),
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Snapshot directory: {}", config.output.snapshot_dir);
    println!("  Top-N: {}", config.output.top_n);

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start listing publishers at {}",
        config.remote.root_location()
    );
}

/// Handles the --stats mode: shows statistics of the existing snapshot
async fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Snapshot: {}\n", config.output.snapshot_dir);

    let writer = LocalSnapshotWriter::new(&config.output.snapshot_dir, config.output.top_n);
    match writer.load_stats().await? {
        Some(stats) => print_statistics(&stats),
        None => println!("No snapshot statistics found"),
    }

    Ok(())
}

/// Marks an interrupt; returns true when one was already pending
fn is_repeated_interrupt(flag: &AtomicBool) -> bool {
    flag.swap(true, Ordering::SeqCst)
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    config_hash: &str,
    resume: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if resume {
        tracing::info!("Starting crawl (resuming from the last checkpoint if present)");
    } else {
        tracing::info!("Starting fresh crawl");
    }
    tracing::info!("Root listing: {}", config.remote.root_location());

    // First Ctrl-C stops the run at the next batch boundary, a second one exits at once
    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if is_repeated_interrupt(&signal_flag) {
                tracing::warn!("Second interrupt received, exiting without a final write");
                std::process::exit(130);
            }
            tracing::warn!("Interrupt received, stopping after the current batch (press Ctrl-C again to exit)");
        }
    });

    match crawl(config, config_hash, resume, cancel).await {
        Ok(summary) => {
            println!("{}", summary);
            match summary.status {
                RunStatus::Completed => tracing::info!("Crawl completed successfully"),
                RunStatus::Cancelled | RunStatus::TimedOut => {
                    tracing::info!("Crawl stopped early; rerun with --resume to continue")
                }
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
