use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use econpapers_common::{http::PageSource, store, CatalogStore, EnrichmentStore, Result};
use indicatif::ProgressBar;
use log::{error, info, warn};

use crate::{
    checkpoint::{run_coordinator, Checkpointer, Reason},
    plan::plan_work,
    pool::{run_pool, PoolConfig, PoolReport},
    shared::SharedStore,
};

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub pool: PoolConfig,
    pub checkpoint_every: usize,
    pub checkpoint_interval: Duration,
}

#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub listed: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub already_done: usize,
    pub queued: usize,
    pub report: PoolReport,
    pub records_saved: usize,
    pub checkpoints: usize,
    pub interrupted: bool,
}

pub fn run_update<S: PageSource + ?Sized>(
    source: &S,
    config: &UpdateConfig,
    stop: &AtomicBool,
    progress: &ProgressBar,
) -> Result<UpdateSummary> {
    let catalog: CatalogStore = store::load_json(&config.input)?;
    let existing: EnrichmentStore = store::load_json_or_default(&config.output)?;
    info!(
        "Loaded {} catalog pages from {} and {} enriched records from {}",
        catalog.len(),
        config.input.display(),
        existing.len(),
        config.output.display()
    );

    let plan = plan_work(&catalog, &existing);
    info!(
        "Catalog lists {} entries ({} unique, {} duplicates, {} invalid)",
        plan.listed, plan.unique, plan.duplicates, plan.invalid
    );
    info!(
        "Already done: {}, queued: {} ({} fetched before without an abstract)",
        plan.already_done,
        plan.items.len(),
        plan.retrying
    );

    let mut summary = UpdateSummary {
        listed: plan.listed,
        unique: plan.unique,
        duplicates: plan.duplicates,
        already_done: plan.already_done,
        queued: plan.items.len(),
        records_saved: existing.len(),
        ..Default::default()
    };
    if plan.items.is_empty() {
        info!("Nothing to fetch: every catalog entry already has an abstract.");
        return Ok(summary);
    }
    store::check_writable(&config.output)?;

    progress.set_length(plan.items.len() as u64);
    let shared = SharedStore::new(existing, config.checkpoint_every);
    let checkpointer = Checkpointer::new(&config.output);

    summary.report = thread::scope(|scope| {
        let coordinator = thread::Builder::new()
            .name("checkpoint".to_string())
            .spawn_scoped(scope, || {
                run_coordinator(&shared, &checkpointer, config.checkpoint_interval)
            });
        if let Err(e) = &coordinator {
            warn!("Checkpoint coordinator did not start, saving only at the end: {}", e);
        }

        let report = run_pool(source, plan.items, &shared, stop, &config.pool, progress);

        shared.close();
        if let Ok(handle) = coordinator {
            if handle.join().is_err() {
                error!("Checkpoint coordinator panicked");
            }
        }
        report
    });

    summary.interrupted = stop.load(Ordering::SeqCst);
    info!("Worker pool finished with {} records in memory.", shared.len());
    summary.records_saved = checkpointer.save(&shared, Reason::Final)?;
    summary.checkpoints = checkpointer.saves();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detail::tests::DETAIL_PAGE;
    use crate::pool::tests::{instant_config, key, FakeDetails};
    use econpapers_common::{records::page_label, CatalogRecord, EnrichedRecord, Error};
    use std::{fs, path::Path};

    fn catalog_entry(n: u32) -> CatalogRecord {
        CatalogRecord {
            title: format!("Paper {}", n),
            url: format!("/paper/p/{}.htm", n),
            ..Default::default()
        }
    }

    fn write_catalog(dir: &Path, pages: Vec<Vec<u32>>) -> PathBuf {
        let mut catalog = CatalogStore::new();
        for (i, entries) in pages.into_iter().enumerate() {
            catalog.insert(
                page_label(i as u32 + 1),
                entries.into_iter().map(catalog_entry).collect(),
            );
        }
        let path = dir.join("papers_data.json");
        store::write_json(&path, &catalog).unwrap();
        path
    }

    fn config(dir: &Path, input: PathBuf) -> UpdateConfig {
        UpdateConfig {
            input,
            output: dir.join("paper_details.json"),
            pool: instant_config(2, 1),
            checkpoint_every: 100,
            checkpoint_interval: Duration::from_secs(3600),
        }
    }

    fn serving(keys: &[u32]) -> FakeDetails {
        FakeDetails::new(keys.iter().map(|&n| (key(n), Ok(DETAIL_PAGE.to_string()))).collect())
    }

    #[test]
    fn second_run_on_unchanged_catalog_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_catalog(dir.path(), vec![vec![1, 2], vec![3]]);
        let config = config(dir.path(), input);
        let source = serving(&[1, 2, 3]);
        let stop = AtomicBool::new(false);

        let first = run_update(&source, &config, &stop, &ProgressBar::hidden()).unwrap();
        assert_eq!(first.report.merged, 3);
        assert_eq!(first.records_saved, 3);
        let after_first = fs::read(&config.output).unwrap();

        let second = run_update(&source, &config, &stop, &ProgressBar::hidden()).unwrap();
        assert_eq!(second.queued, 0);
        assert_eq!(second.already_done, 3);
        assert_eq!(source.calls.lock().unwrap().len(), 3);
        assert_eq!(fs::read(&config.output).unwrap(), after_first);
    }

    #[test]
    fn key_listed_on_two_pages_is_fetched_and_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_catalog(dir.path(), vec![vec![1, 2], vec![2]]);
        let config = config(dir.path(), input);
        let source = serving(&[1, 2]);
        let summary =
            run_update(&source, &config, &AtomicBool::new(false), &ProgressBar::hidden()).unwrap();

        assert_eq!(summary.duplicates, 1);
        assert_eq!(source.calls_for(&key(2)), 1);
        let saved: EnrichmentStore = store::load_json(&config.output).unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[test]
    fn interrupted_run_keeps_prior_and_merged_records() {
        static STOP: AtomicBool = AtomicBool::new(false);
        let dir = tempfile::tempdir().unwrap();
        let input = write_catalog(dir.path(), vec![vec![1, 2, 3, 4, 5]]);
        let mut config = config(dir.path(), input);
        config.pool = instant_config(1, 1);

        let mut prior = EnrichmentStore::new();
        prior.insert(
            key(1),
            EnrichedRecord {
                catalog: catalog_entry(1),
                abstract_text: Some("From an earlier run.".into()),
                ..Default::default()
            },
        );
        store::write_json(&config.output, &prior).unwrap();
        let prior_bytes = fs::read(&config.output).unwrap();

        let mut source = serving(&[2, 3, 4, 5]);
        source.stop_after = Some((2, &STOP));
        let summary = run_update(&source, &config, &STOP, &ProgressBar::hidden()).unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.report.merged, 2);
        assert_eq!(summary.report.left_queued, 2);
        let saved: EnrichmentStore = store::load_json(&config.output).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[&key(1)].abstract_text.as_deref(), Some("From an earlier run."));
        assert_eq!(fs::read(store::backup_path(&config.output)).unwrap(), prior_bytes);
    }

    #[test]
    fn failed_items_do_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_catalog(dir.path(), vec![vec![1, 2]]);
        let config = config(dir.path(), input);
        let source = serving(&[1]);
        let summary =
            run_update(&source, &config, &AtomicBool::new(false), &ProgressBar::hidden()).unwrap();
        assert_eq!(summary.report.failed.len(), 1);
        assert_eq!(summary.records_saved, 1);
        assert!(!summary.interrupted);
    }

    #[test]
    fn malformed_or_missing_input_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("papers_data.json");
        let config = config(dir.path(), input.clone());
        let source = serving(&[]);
        let stop = AtomicBool::new(false);

        let missing = run_update(&source, &config, &stop, &ProgressBar::hidden());
        assert!(matches!(missing, Err(Error::Io { .. })));

        fs::write(&input, "[not, a, catalog").unwrap();
        let malformed = run_update(&source, &config, &stop, &ProgressBar::hidden());
        assert!(matches!(malformed, Err(Error::Json { .. })));
        assert!(!config.output.exists());
    }
}
