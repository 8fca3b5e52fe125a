use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use econpapers_common::{
    http::HttpFetcher,
    identity::ECONPAPERS_ORIGIN,
    logging::{self, format_elapsed},
    retry::{RetryPolicy, SleepRange},
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};

mod checkpoint;
mod detail;
mod interrupt;
mod plan;
mod pool;
mod shared;
mod update;

use pool::PoolConfig;
use update::{run_update, UpdateConfig};

#[derive(Parser, Debug)]
#[command(name = "EconPapers Paper Details Updater")]
#[command(about = "Fetches abstracts and download links for catalogued papers, resuming from earlier runs.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(short, long, default_value = "papers_data.json", help = "Catalog store written by the crawler")]
    input: PathBuf,

    #[arg(short, long, default_value = "paper_details.json", help = "Enrichment store to update")]
    output: PathBuf,

    #[arg(
        short,
        long,
        default_value = "4",
        help = "Number of worker threads (0 for one per CPU core)"
    )]
    threads: usize,

    #[arg(long, default_value = "1.0", help = "Minimum pause before each request, in seconds")]
    min_sleep: f64,

    #[arg(long, default_value = "3.0", help = "Maximum pause before each request, in seconds")]
    max_sleep: f64,

    #[arg(short, long, default_value = "3", help = "Retries per paper before it is marked failed")]
    retries: u32,

    #[arg(
        short,
        long,
        default_value = "15",
        value_parser = clap::value_parser!(u64).range(1..=10_080),
        help = "Minutes between periodic checkpoints (1 to 10080)"
    )]
    checkpoint_minutes: u64,

    #[arg(long, default_value = "100", help = "Save a checkpoint after this many merged papers")]
    checkpoint_every: usize,

    #[arg(short, long, help = "Enable debug logging")]
    verbose: bool,
}

fn main() -> Result<()> {
    let main_start_time = Instant::now();
    let cli = Cli::parse();
    logging::init(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })?;

    info!("Starting EconPapers Paper Details Updater v1.0.0");

    let threads = if cli.threads == 0 {
        let cores = num_cpus::get();
        info!("Auto-detected {} CPU cores. Using {} worker threads.", cores, cores);
        cores
    } else {
        info!("Using specified {} worker threads.", cli.threads);
        cli.threads
    };

    info!("Input file: {}", cli.input.display());
    info!("Output file: {}", cli.output.display());
    info!("Pause before each request: {:.1}-{:.1}s", cli.min_sleep, cli.max_sleep);
    info!("Retries per paper: {}", cli.retries);
    info!(
        "Checkpoint every {} merges or {} minutes, whichever comes first",
        cli.checkpoint_every, cli.checkpoint_minutes
    );

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = interrupt::listen_for_interrupt(Arc::clone(&stop)) {
        warn!("Ctrl-C handling unavailable, an interrupt will not flush a checkpoint: {}", e);
    }

    let fetcher =
        HttpFetcher::new(Some(ECONPAPERS_ORIGIN)).context("Failed to set up HTTP client")?;
    let config = UpdateConfig {
        input: cli.input.clone(),
        output: cli.output.clone(),
        pool: PoolConfig {
            threads,
            pacing: SleepRange::from_secs(cli.min_sleep, cli.max_sleep)?,
            retry: RetryPolicy::with_max_retries(cli.retries),
        },
        checkpoint_every: cli.checkpoint_every,
        checkpoint_interval: Duration::from_secs(cli.checkpoint_minutes * 60),
    };

    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] Papers: [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("Failed to create progress bar template")
            .progress_chars("=> "),
    );

    info!("--- Starting enrichment pass ---");
    let summary = run_update(&fetcher, &config, &stop, &progress_bar)
        .with_context(|| format!("Enrichment of {} failed", cli.input.display()))?;
    if summary.interrupted {
        progress_bar.abandon_with_message("Interrupted.");
    } else {
        progress_bar.finish_with_message("Done.");
    }

    let report = &summary.report;
    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    let status = if summary.interrupted {
        "interrupted, progress saved"
    } else {
        "complete"
    };
    info!("Status: {}", status);
    info!(
        "Catalog entries: {} ({} unique, {} duplicates)",
        summary.listed, summary.unique, summary.duplicates
    );
    info!("Already done before this run: {}", summary.already_done);
    info!("Queued this run: {}", summary.queued);
    info!("Merged: {} ({} without an abstract)", report.merged, report.without_abstract);
    info!("Finished by another worker first: {}", report.kept_existing);
    info!("Failed: {}", report.failed.len());
    info!("Left for the next run: {}", report.left_queued);
    info!("Checkpoints written: {}", summary.checkpoints);
    info!("Records in {}: {}", cli.output.display(), summary.records_saved);
    if !report.failed.is_empty() {
        error!("Papers that failed after all retries:");
        for failed in &report.failed {
            error!("  {} ({} attempts): {}", failed.key, failed.attempts, failed.error);
        }
    }
    info!("-------------------------------------------------------");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_minutes_outside_range_are_rejected() {
        assert!(Cli::try_parse_from(["updater", "-c", "0"]).is_err());
        assert!(Cli::try_parse_from(["updater", "-c", "18446744073709551615"]).is_err());
        assert_eq!(Cli::try_parse_from(["updater"]).unwrap().checkpoint_minutes, 15);
    }
}
