use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use econpapers_common::{
    logging::{self, format_elapsed},
    retry::SleepRange,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

mod classifier;
mod review;

use classifier::ChatCompletionsClassifier;
use review::{review_papers, ReviewConfig};

#[derive(Parser, Debug)]
#[command(name = "EconPapers Strategy Reviewer")]
#[command(about = "Asks a chat-completions model whether each enriched paper describes a trading strategy.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(long, default_value = "paper_details.json", help = "Enrichment store to review")]
    details: PathBuf,

    #[arg(long, default_value = "strategy_reviews.json", help = "Review store to update")]
    reviews: PathBuf,

    #[arg(
        long,
        default_value = "https://api.siliconflow.com/v1/chat/completions",
        help = "OpenAI-compatible chat-completions endpoint"
    )]
    endpoint: String,

    #[arg(long, default_value = "Pro/deepseek-ai/DeepSeek-V3", help = "Model to request")]
    model: String,

    #[arg(
        long,
        default_value = "SILICONFLOW_APIKEY",
        help = "Environment variable holding the API key (.env is read first)"
    )]
    api_key_env: String,

    #[arg(long, help = "Maximum number of classification calls this run")]
    limit: Option<usize>,

    #[arg(long, default_value = "0.5", help = "Minimum pause between calls, in seconds")]
    min_sleep: f64,

    #[arg(long, default_value = "1.5", help = "Maximum pause between calls, in seconds")]
    max_sleep: f64,

    #[arg(long, default_value = "50", help = "Abstracts shorter than this are skipped")]
    min_abstract_chars: usize,

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

    info!("Starting EconPapers Strategy Reviewer v1.0.0");
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!("Could not read .env file: {}", e);
        }
    }
    let api_key = std::env::var(&cli.api_key_env)
        .with_context(|| format!("API key variable {} is not set", cli.api_key_env))?;

    info!("Details file: {}", cli.details.display());
    info!("Reviews file: {}", cli.reviews.display());
    info!("Endpoint: {}", cli.endpoint);
    info!("Model: {}", cli.model);
    info!("Minimum abstract length: {} chars", cli.min_abstract_chars);
    if let Some(limit) = cli.limit {
        info!("Call limit: {}", limit);
    }

    let classifier = ChatCompletionsClassifier::new(&api_key, &cli.endpoint, &cli.model)?;
    let config = ReviewConfig {
        details: cli.details.clone(),
        reviews: cli.reviews.clone(),
        min_abstract_chars: cli.min_abstract_chars,
        limit: cli.limit,
        pacing: SleepRange::from_secs(cli.min_sleep, cli.max_sleep)?,
    };

    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] Reviews: [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("Failed to create progress bar template")
            .progress_chars("=> "),
    );

    let summary = review_papers(&classifier, &config, &progress_bar)
        .with_context(|| format!("Reviewing {} failed", cli.details.display()))?;
    progress_bar.finish_with_message("Reviews complete.");

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    info!("Papers in details file: {}", summary.papers);
    info!("Already reviewed: {}", summary.already_reviewed);
    info!("Classified this run: {} ({} strategy papers)", summary.classified, summary.positive);
    info!("Skipped (abstract too short): {}", summary.skipped_short);
    info!("Failed (left for the next run): {}", summary.failed);
    if summary.not_attempted > 0 {
        info!("Not attempted (call limit): {}", summary.not_attempted);
    }
    info!("Reviews in {}: {}", cli.reviews.display(), summary.total_reviews);
    info!("-------------------------------------------------------");

    Ok(())
}
