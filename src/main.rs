use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::{debug, error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use tokio::time::sleep;
use vote_scraper::{
    browser_controller::{BackendSelection, BrowserBackend},
    config::{ScraperOptions, SinkTargets},
    runner::Runner,
    utils::{
        watch_schedule, ANALYTICS_TABLE, BUCKET_NAME, DEFAULT_SCRAPE_INTERVAL_MINUTES,
        DEFAULT_SCREENSHOT_DIR, DEFAULT_TARGET_URL,
    },
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Project vote scraper", long_about = None)]
struct Args {
    /// Listing page holding every project
    #[arg(short = 'u', long, default_value = DEFAULT_TARGET_URL)]
    url: String,
    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,
    /// Backends picked from at random, once per run
    #[arg(short = 'b', long = "backend", value_enum, default_values_t = [BrowserBackend::Chrome])]
    backends: Vec<BrowserBackend>,
    /// Minimum time in milliseconds to wait between two project pages
    #[arg(long, default_value_t = 1000)]
    min_delay_ms: u64,
    /// Maximum time in milliseconds to wait between two project pages
    #[arg(long, default_value_t = 3000)]
    max_delay_ms: u64,
    /// Time in milliseconds to wait after every navigation
    #[arg(long, default_value_t = 0)]
    settle_ms: u64,
    /// Maximum time the browser will wait for an event before timing out
    #[arg(long, default_value_t = 45)]
    browser_timeout: u64,
    /// Don't print the records
    #[arg(short = 'q', long)]
    quiet: bool,
    /// Insert the records into the analytics table
    #[arg(short = 'a', long)]
    analytics: bool,
    /// Analytics table id, defaults to $BIGQUERY_TABLE
    #[arg(long)]
    table: Option<String>,
    /// Screenshot the listing page and upload it to the bucket
    #[arg(short = 's', long)]
    screenshot: bool,
    /// Bucket receiving the screenshots, defaults to $BUCKET
    #[arg(long)]
    bucket: Option<String>,
    /// Local directory for screenshots
    #[arg(short = 'd', long, default_value = DEFAULT_SCREENSHOT_DIR)]
    screenshot_dir: PathBuf,
    /// Keep scraping on a schedule until interrupted
    #[arg(short = 'w', long)]
    watch: bool,
    /// Minutes between two scheduled runs
    #[arg(short = 'i', long, default_value_t = DEFAULT_SCRAPE_INTERVAL_MINUTES)]
    interval_minutes: u32,
}

fn build_options(args: &Args) -> anyhow::Result<ScraperOptions> {
    let backend = BackendSelection::from_choices(args.backends.clone())?;

    let sinks = SinkTargets {
        stdout: !args.quiet,
        analytics_table: args
            .analytics
            .then(|| args.table.clone().unwrap_or_else(|| ANALYTICS_TABLE.clone())),
        bucket: args
            .screenshot
            .then(|| args.bucket.clone().unwrap_or_else(|| BUCKET_NAME.clone())),
    };

    ScraperOptions::default_builder()
        .target_url(args.url.clone())
        .headless(!args.headed)
        .backend(backend)
        .min_delay(Duration::from_millis(args.min_delay_ms))
        .max_delay(Duration::from_millis(args.max_delay_ms))
        .settle_after_navigation(Duration::from_millis(args.settle_ms))
        .browser_timeout(Duration::from_secs(args.browser_timeout))
        .sinks(sinks)
        .screenshot_dir(args.screenshot_dir.clone())
        .scrape_interval_minutes(args.interval_minutes)
        .build()
        .context("invalid options")
}

async fn run_once(options: ScraperOptions) -> anyhow::Result<()> {
    let mut runner = Runner::new(options)?;
    let report = runner.run().await?;
    report.log_summary();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let options = build_options(&args)?;

    debug!("Starting scraper with {:#?}", options);

    if !args.watch {
        return run_once(options).await;
    }

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let schedule = watch_schedule(options.scrape_interval_minutes)?;

    while !should_terminate.load(Ordering::Relaxed) {
        if let Err(e) = run_once(options.clone()).await {
            error!("run failed: {:#}", e);
        }

        let next = match schedule.upcoming(Utc).next() {
            Some(n) => n,
            None => break,
        };
        info!("next run at {}", next);
        while Utc::now() < next && !should_terminate.load(Ordering::Relaxed) {
            sleep(Duration::from_secs(1)).await;
        }
    }

    info!("terminating, goodbye");
    Ok(())
}
