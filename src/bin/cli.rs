//! flatwatch CLI
//!
//! Local execution entry point for one-shot runs, the polling watcher,
//! and CSV export of the persisted listing set.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flatwatch::{
    config,
    error::Result,
    export,
    models::Config,
    pipeline::{Pipeline, PollScheduler},
    services::{Dispatcher, FeedBrowser, GalleryFetcher, Materializer, TelegramNotifier},
    storage::{self, ListingStore, MemoryStore},
};
use tokio::sync::watch;

/// flatwatch - Listing Feed Watcher
#[derive(Parser, Debug)]
#[command(name = "flatwatch", version, about = "Watches a classifieds feed for new listings")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "flatwatch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once
    Run {
        /// Feed URL override (default: built from config)
        #[arg(long)]
        url: Option<String>,

        /// Result-count hint override
        #[arg(long)]
        rows: Option<u32>,

        /// Also write the run's listings to a CSV file
        #[arg(long)]
        out: Option<PathBuf>,

        /// Run the browser in visible mode (for debugging)
        #[arg(long)]
        no_headless: bool,

        /// Skip the persistent store (results only, no change detection)
        #[arg(long)]
        no_db: bool,

        /// Skip downstream dispatch of new listings
        #[arg(long)]
        skip_dispatch: bool,
    },

    /// Poll the feed on the configured interval until interrupted
    Watch {
        /// Polling interval override in minutes
        #[arg(long)]
        interval_mins: Option<u64>,
    },

    /// Export persisted listings to CSV
    Export {
        /// Output CSV file path
        #[arg(long, default_value = "listings.csv")]
        out: PathBuf,

        /// Maximum number of listings to export
        #[arg(long, default_value_t = 1000)]
        limit: i64,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Shutdown signal wired to ctrl-c.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

fn build_dispatcher(config: &Config) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(config);

    if let Some(notifier) = TelegramNotifier::from_config(config) {
        log::info!("Telegram notifications enabled");
        dispatcher = dispatcher.with_notifier(Arc::new(notifier));
    }
    if config.dispatch.download_photos {
        log::info!("Photo downloads enabled ({})", config.dispatch.photos_dir);
        dispatcher = dispatcher.with_photo_fetcher(Arc::new(GalleryFetcher::new(config)));
    }

    dispatcher
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = config::load_validated(&cli.config)?;

    match cli.command {
        Command::Run {
            url,
            rows,
            out,
            no_headless,
            no_db,
            skip_dispatch,
        } => {
            if let Some(url) = url {
                config.feed.url = Some(url);
            }
            if let Some(rows) = rows {
                config.feed.rows = rows;
            }
            if no_headless {
                config.browser.headless = false;
            }

            let config = Arc::new(config);
            let store: Arc<dyn ListingStore> = if no_db {
                log::info!("Store disabled: every listing will appear new");
                Arc::new(MemoryStore::new())
            } else {
                storage::connect_or_fallback(&config).await
            };

            let browser = Arc::new(FeedBrowser::new(Arc::clone(&config))) as Arc<dyn Materializer>;
            let pipeline = Pipeline::new(Arc::clone(&config), browser, store);

            let mut shutdown = shutdown_channel();
            let outcome = pipeline.execute(&mut shutdown).await;

            if !skip_dispatch && !outcome.reconciliation.new.is_empty() {
                let dispatcher = build_dispatcher(&config);
                dispatcher.dispatch_new(&outcome.reconciliation.new).await;
            }

            if let Some(out) = out {
                export::write_csv(&outcome.listings, &out)?;
            }

            log::info!(
                "Run {}: {} found, {} new, {} updated",
                outcome.report.status.as_str(),
                outcome.report.listings_found,
                outcome.report.new_count,
                outcome.report.updated_count
            );

            if !outcome.succeeded() {
                std::process::exit(1);
            }
        }

        Command::Watch { interval_mins } => {
            if let Some(mins) = interval_mins {
                config.scheduler.interval_mins = mins;
            }

            let config = Arc::new(config);
            let store = storage::connect_or_fallback(&config).await;
            let browser = Arc::new(FeedBrowser::new(Arc::clone(&config))) as Arc<dyn Materializer>;
            let pipeline = Pipeline::new(Arc::clone(&config), browser, store);
            let dispatcher = build_dispatcher(&config);

            let mut scheduler =
                PollScheduler::new(pipeline, dispatcher, config.scheduler.interval_mins);
            scheduler.run(shutdown_channel()).await;
        }

        Command::Export { out, limit } => {
            let config = Arc::new(config);
            let store = storage::connect_or_fallback(&config).await;

            let stored = store.recent_listings(limit).await?;
            let listings: Vec<_> = stored.iter().map(|s| s.listing()).collect();
            export::write_csv(&listings, &out)?;
            log::info!("Exported {} listings to {}", listings.len(), out.display());
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            log::info!("✓ Config OK");
        }
    }

    Ok(())
}
