use std::path::PathBuf;

use econpapers_common::{retry::SleepRange, store, ClassificationStore, EnrichmentStore, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::classifier::Classifier;

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub details: PathBuf,
    pub reviews: PathBuf,
    pub min_abstract_chars: usize,
    /// Maximum classifier calls this run.
    pub limit: Option<usize>,
    pub pacing: SleepRange,
}

#[derive(Debug, Default, PartialEq)]
pub struct ReviewSummary {
    pub papers: usize,
    pub already_reviewed: usize,
    pub classified: usize,
    pub positive: usize,
    pub skipped_short: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub total_reviews: usize,
}

/// Classifies every enriched paper without a verdict, saving the review store
/// after each new verdict. Failed calls are logged and left for a later run.
pub fn review_papers<C: Classifier + ?Sized>(
    classifier: &C,
    config: &ReviewConfig,
    progress: &ProgressBar,
) -> Result<ReviewSummary> {
    let details: EnrichmentStore = store::load_json(&config.details)?;
    let mut reviews: ClassificationStore = store::load_json_or_default(&config.reviews)?;
    store::check_writable(&config.reviews)?;
    info!(
        "Loaded {} papers from {} and {} existing reviews from {}",
        details.len(),
        config.details.display(),
        reviews.len(),
        config.reviews.display()
    );

    let mut summary = ReviewSummary {
        papers: details.len(),
        ..Default::default()
    };
    progress.set_length(details.len() as u64);
    let mut calls = 0usize;

    for (key, record) in &details {
        progress.inc(1);
        if reviews.contains_key(key) {
            debug!("Skipping {}: already reviewed", key);
            summary.already_reviewed += 1;
            continue;
        }
        let abstract_text = record.abstract_text.as_deref().unwrap_or("").trim();
        if abstract_text.chars().count() < config.min_abstract_chars {
            debug!("Skipping {}: abstract too short or empty", key);
            summary.skipped_short += 1;
            continue;
        }
        if config.limit.map_or(false, |limit| calls >= limit) {
            summary.not_attempted += 1;
            continue;
        }

        if calls > 0 {
            std::thread::sleep(config.pacing.sample());
        }
        calls += 1;
        progress.set_message(format!(
            "classified: {}, failed: {}",
            summary.classified, summary.failed
        ));

        match classifier.classify(record.display_title(), abstract_text) {
            Ok(verdict) => {
                info!(
                    "{} -> strategy: {} ({})",
                    record.display_title(),
                    verdict.strategy,
                    verdict.reason
                );
                if verdict.strategy {
                    summary.positive += 1;
                }
                summary.classified += 1;
                reviews.insert(key.clone(), verdict);
                store::write_json(&config.reviews, &reviews)?;
            }
            Err(e) => {
                warn!("Could not classify {}: {}", key, e);
                summary.failed += 1;
            }
        }
    }

    if config.limit.is_some() && summary.not_attempted > 0 {
        info!("Call limit reached; {} papers left for the next run.", summary.not_attempted);
    }
    summary.total_reviews = reviews.len();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassificationError;
    use econpapers_common::{ClassificationVerdict, EnrichedRecord, PaperKey, StatusCode};
    use std::{cell::RefCell, fs, path::Path};

    /// Answers from a script keyed by title; unknown titles are malformed.
    struct ScriptedClassifier {
        answers: Vec<(&'static str, std::result::Result<bool, u16>)>,
        calls: RefCell<Vec<String>>,
    }

    impl Classifier for ScriptedClassifier {
        fn classify(
            &self,
            title: &str,
            _abstract_text: &str,
        ) -> std::result::Result<ClassificationVerdict, ClassificationError> {
            self.calls.borrow_mut().push(title.to_string());
            match self.answers.iter().find(|(t, _)| *t == title) {
                Some((_, Ok(strategy))) => Ok(ClassificationVerdict {
                    strategy: *strategy,
                    reason: "scripted".into(),
                    model: "test-model".into(),
                }),
                Some((_, Err(code))) => Err(ClassificationError::Status {
                    status: StatusCode::from_u16(*code).unwrap(),
                    body: String::new(),
                }),
                None => Err(ClassificationError::MalformedResponse("no script".into())),
            }
        }
    }

    fn scripted(
        answers: Vec<(&'static str, std::result::Result<bool, u16>)>,
    ) -> ScriptedClassifier {
        ScriptedClassifier {
            answers,
            calls: RefCell::new(Vec::new()),
        }
    }

    const LONG: &str = "We document a cross-sectional return anomaly that survives transaction costs.";

    fn write_details(dir: &Path, papers: &[(&str, &str)]) -> PathBuf {
        let details: EnrichmentStore = papers
            .iter()
            .enumerate()
            .map(|(i, (title, abstract_text))| {
                let key = PaperKey::from_href(&format!("/paper/r/{}.htm", i)).unwrap();
                let mut record = EnrichedRecord::default();
                record.catalog.title = title.to_string();
                record.catalog.url = key.as_str().to_string();
                record.abstract_text = Some(abstract_text.to_string());
                (key, record)
            })
            .collect();
        let path = dir.join("paper_details.json");
        store::write_json(&path, &details).unwrap();
        path
    }

    fn config(dir: &Path, details: PathBuf) -> ReviewConfig {
        ReviewConfig {
            details,
            reviews: dir.join("strategy_reviews.json"),
            min_abstract_chars: 50,
            limit: None,
            pacing: SleepRange::from_secs(0.0, 0.0).unwrap(),
        }
    }

    #[test]
    fn classifies_new_papers_and_skips_short_abstracts() {
        let dir = tempfile::tempdir().unwrap();
        let details = write_details(dir.path(), &[("A", LONG), ("B", LONG), ("C", "Too short.")]);
        let config = config(dir.path(), details);
        let classifier = scripted(vec![("A", Ok(true)), ("B", Ok(false))]);

        let summary = review_papers(&classifier, &config, &ProgressBar::hidden()).unwrap();
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.positive, 1);
        assert_eq!(summary.skipped_short, 1);
        assert_eq!(*classifier.calls.borrow(), vec!["A", "B"]);

        let saved: ClassificationStore = store::load_json(&config.reviews).unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.values().all(|v| v.model == "test-model"));
    }

    #[test]
    fn existing_verdicts_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let details = write_details(dir.path(), &[("A", LONG), ("B", LONG)]);
        let config = config(dir.path(), details);

        let mut prior = ClassificationStore::new();
        prior.insert(
            PaperKey::from_href("/paper/r/0.htm").unwrap(),
            ClassificationVerdict {
                strategy: false,
                reason: "earlier run".into(),
                model: "old-model".into(),
            },
        );
        store::write_json(&config.reviews, &prior).unwrap();

        let classifier = scripted(vec![("A", Ok(true)), ("B", Ok(true))]);
        let summary = review_papers(&classifier, &config, &ProgressBar::hidden()).unwrap();
        assert_eq!(summary.already_reviewed, 1);
        assert_eq!(*classifier.calls.borrow(), vec!["B"]);

        let saved: ClassificationStore = store::load_json(&config.reviews).unwrap();
        let kept = &saved[&PaperKey::from_href("/paper/r/0.htm").unwrap()];
        assert_eq!(kept.model, "old-model");
        assert!(!kept.strategy);
    }

    #[test]
    fn failed_calls_leave_papers_unclassified() {
        let dir = tempfile::tempdir().unwrap();
        let details = write_details(dir.path(), &[("A", LONG), ("B", LONG), ("C", LONG)]);
        let config = config(dir.path(), details);
        let classifier = scripted(vec![("A", Err(500)), ("C", Ok(true))]);

        let summary = review_papers(&classifier, &config, &ProgressBar::hidden()).unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.classified, 1);
        let saved: ClassificationStore = store::load_json(&config.reviews).unwrap();
        assert_eq!(saved.len(), 1);

        // A later run retries exactly the two that failed.
        let retry = scripted(vec![("A", Ok(false)), ("B", Ok(false))]);
        let second = review_papers(&retry, &config, &ProgressBar::hidden()).unwrap();
        assert_eq!(*retry.calls.borrow(), vec!["A", "B"]);
        assert_eq!(second.total_reviews, 3);
    }

    #[test]
    fn limit_caps_classifier_calls() {
        let dir = tempfile::tempdir().unwrap();
        let details = write_details(dir.path(), &[("A", LONG), ("B", LONG), ("C", LONG)]);
        let mut config = config(dir.path(), details);
        config.limit = Some(2);
        let classifier = scripted(vec![("A", Ok(true)), ("B", Ok(true)), ("C", Ok(true))]);

        let summary = review_papers(&classifier, &config, &ProgressBar::hidden()).unwrap();
        assert_eq!(classifier.calls.borrow().len(), 2);
        assert_eq!(summary.not_attempted, 1);
    }

    #[test]
    fn unwritable_review_store_fails_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let details = write_details(dir.path(), &[("A", LONG)]);
        let mut config = config(dir.path(), details);
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        config.reviews = blocker.join("strategy_reviews.json");
        let classifier = scripted(vec![("A", Ok(true))]);

        assert!(review_papers(&classifier, &config, &ProgressBar::hidden()).is_err());
        assert!(classifier.calls.borrow().is_empty());
    }

    #[test]
    fn missing_details_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), dir.path().join("absent.json"));
        let classifier = scripted(vec![]);
        assert!(review_papers(&classifier, &config, &ProgressBar::hidden()).is_err());
        assert!(!Path::new(&config.reviews).exists());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
