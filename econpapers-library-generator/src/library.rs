use econpapers_common::{ClassificationStore, EnrichedRecord, EnrichmentStore, LibraryEntry};

#[derive(Debug, Default, PartialEq)]
pub struct Projection {
    pub entries: Vec<LibraryEntry>,
    pub rejected: usize,
    pub unreviewed: usize,
    /// Verdicts whose paper is missing from the enrichment store.
    pub orphaned_reviews: usize,
}

/// Splits a catalog keyword string on commas and semicolons, trimming terms
/// and dropping blanks and repeats while keeping first-seen order.
pub fn split_keywords(raw: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in raw.split([',', ';']).map(str::trim).filter(|t| !t.is_empty()) {
        if !terms.iter().any(|seen| seen == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn keywords_of(record: &EnrichedRecord) -> Vec<String> {
    let from_catalog = record
        .catalog
        .keywords
        .as_deref()
        .map(split_keywords)
        .unwrap_or_default();
    if !from_catalog.is_empty() {
        return from_catalog;
    }
    split_keywords(&record.keyword_terms.join(";"))
}

/// Joins the two stores on the paper key and keeps strategy papers only.
/// Output follows key order, so identical inputs give identical files.
pub fn project_library(details: &EnrichmentStore, reviews: &ClassificationStore) -> Projection {
    let mut projection = Projection {
        orphaned_reviews: reviews.keys().filter(|key| !details.contains_key(key)).count(),
        ..Default::default()
    };

    for (key, record) in details {
        let Some(verdict) = reviews.get(key) else {
            projection.unreviewed += 1;
            continue;
        };
        if !verdict.strategy {
            projection.rejected += 1;
            continue;
        }
        projection.entries.push(LibraryEntry {
            title: record.display_title().to_string(),
            abstract_text: record.abstract_text.clone().unwrap_or_default(),
            keywords: keywords_of(record),
            eco_link: key.as_str().to_string(),
            reviewed_by: verdict.model.clone(),
        });
    }
    projection
}
