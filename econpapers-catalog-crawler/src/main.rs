use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use econpapers_common::{
    http::HttpFetcher,
    logging::{self, format_elapsed},
    retry::{RetryPolicy, SleepRange},
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

mod crawl;
mod listing;

use crawl::{crawl_to_file, CatalogPages, CatalogQuery};

#[derive(Parser, Debug)]
#[command(name = "EconPapers Catalog Crawler")]
#[command(about = "Walks EconPapers search result pages and saves every listed paper, one page at a time.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(
        long,
        default_value = "https://econpapers.repec.org/scripts/search.pf",
        help = "Search endpoint of the catalog"
    )]
    base_url: String,

    #[arg(long, default_value = "G14", help = "JEL code used as the topical filter")]
    jel: String,

    #[arg(long, default_value = "1000", help = "Results requested per page")]
    per_page: u32,

    #[arg(long, default_value = "1", help = "First page to fetch")]
    start_page: u32,

    #[arg(long, help = "Maximum number of pages to fetch (default: all announced pages)")]
    max_pages: Option<u32>,

    #[arg(
        short,
        long,
        default_value = "papers_data.json",
        help = "Catalog store to write (replaced by this crawl)"
    )]
    output: PathBuf,

    #[arg(long, default_value = "1.0", help = "Minimum pause between page requests, in seconds")]
    min_sleep: f64,

    #[arg(long, default_value = "2.0", help = "Maximum pause between page requests, in seconds")]
    max_sleep: f64,

    #[arg(short, long, default_value = "3", help = "Retries per page before the crawl is aborted")]
    retries: u32,

    #[arg(
        short,
        long,
        default_value = "INFO",
        help = "Logging level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    log_level: String,
}

fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let cli = Cli::parse();
    logging::init(logging::parse_level(&cli.log_level))?;

    info!("Starting EconPapers Catalog Crawler v1.0.0");
    info!("Search endpoint: {}", cli.base_url);
    info!("JEL filter: {}", cli.jel);
    info!("Results per page: {}", cli.per_page);
    info!("Start page: {}", cli.start_page);
    match cli.max_pages {
        Some(max) => info!("Page limit: {}", max),
        None => info!("Page limit: none (stop at last announced page)"),
    }
    info!("Output file: {}", cli.output.display());
    info!("Pause between requests: {:.1}-{:.1}s", cli.min_sleep, cli.max_sleep);
    info!("Retries per page: {}", cli.retries);

    let fetcher = HttpFetcher::new(Some(&cli.base_url)).context("Failed to set up HTTP client")?;
    let query = CatalogQuery {
        base_url: cli.base_url.clone(),
        jel: cli.jel.clone(),
        per_page: cli.per_page,
    };
    query
        .page_url(cli.start_page)
        .with_context(|| format!("Invalid search endpoint: {}", cli.base_url))?;

    let pages = CatalogPages::new(
        &fetcher,
        query,
        cli.start_page,
        cli.max_pages,
        RetryPolicy::with_max_retries(cli.retries),
        SleepRange::from_secs(cli.min_sleep, cli.max_sleep)?,
    );

    let progress_bar = match cli.max_pages {
        Some(max) => ProgressBar::new(max as u64),
        None => ProgressBar::new_spinner(),
    };
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] Pages: {pos} {wide_msg}")
            .expect("Failed to create progress bar template"),
    );

    info!("--- Starting fresh crawl ---");
    let summary = match crawl_to_file(pages, &cli.output, &progress_bar) {
        Ok(summary) => summary,
        Err(e) => {
            progress_bar.abandon_with_message("Crawl aborted.");
            error!("Crawl aborted: {}", e);
            error!(
                "Pages fetched before the failure remain in {}; rerun to refresh the full catalog.",
                cli.output.display()
            );
            return Err(e).context("Catalog crawl failed");
        }
    };
    progress_bar.finish_with_message("Crawl complete.");

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    info!("Pages saved: {}", summary.pages);
    info!("Records listed: {}", summary.records);
    info!("Unique papers: {}", summary.unique_papers);
    info!("Output file: {}", cli.output.display());
    info!("-------------------------------------------------------");

    Ok(())
}
