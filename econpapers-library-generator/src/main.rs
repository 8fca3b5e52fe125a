use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use econpapers_common::{
    logging::{self, format_elapsed},
    store, ClassificationStore, EnrichmentStore,
};
use log::{info, warn};

mod library;

use library::project_library;

#[derive(Parser, Debug)]
#[command(name = "EconPapers Library Generator")]
#[command(about = "Builds the public strategy library from enriched papers and their reviews.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(long, default_value = "paper_details.json", help = "Enrichment store")]
    details: PathBuf,

    #[arg(long, default_value = "strategy_reviews.json", help = "Review store")]
    reviews: PathBuf,

    #[arg(short, long, default_value = "library.json", help = "Library file to (re)generate")]
    output: PathBuf,

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

    info!("Starting EconPapers Library Generator v1.0.0");
    info!("Details file: {}", cli.details.display());
    info!("Reviews file: {}", cli.reviews.display());
    info!("Output file: {}", cli.output.display());

    let details: EnrichmentStore =
        store::load_json(&cli.details).context("Failed to load enrichment store")?;
    let reviews: ClassificationStore =
        store::load_json(&cli.reviews).context("Failed to load review store")?;

    let projection = project_library(&details, &reviews);
    if projection.orphaned_reviews > 0 {
        warn!(
            "{} reviews refer to papers missing from {}",
            projection.orphaned_reviews,
            cli.details.display()
        );
    }
    store::write_json(&cli.output, &projection.entries)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(main_start_time.elapsed()));
    info!("Papers: {}, reviews: {}", details.len(), reviews.len());
    info!("Library entries: {}", projection.entries.len());
    info!("Rejected by review: {}", projection.rejected);
    info!("Not yet reviewed: {}", projection.unreviewed);
    info!("Output file: {}", cli.output.display());
    info!("-------------------------------------------------------");

    Ok(())
}
