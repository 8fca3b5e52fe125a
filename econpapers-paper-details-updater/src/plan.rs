use std::collections::HashSet;

use econpapers_common::{
    records::pages_in_order, CatalogRecord, CatalogStore, EnrichmentStore, PaperKey,
};
use log::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: PaperKey,
    pub record: CatalogRecord,
}

#[derive(Debug, Default)]
pub struct WorkPlan {
    pub items: Vec<WorkItem>,
    pub listed: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub already_done: usize,
    /// Queued entries that were fetched before but still lack an abstract.
    pub retrying: usize,
    pub invalid: usize,
}

/// Flattens the catalog in page order and keeps the first occurrence of each
/// key. Keys whose enrichment entry already has an abstract are left out.
pub fn plan_work(catalog: &CatalogStore, existing: &EnrichmentStore) -> WorkPlan {
    let mut plan = WorkPlan::default();
    let mut seen = HashSet::new();

    for (label, records) in pages_in_order(catalog) {
        for record in records {
            plan.listed += 1;
            let key = match PaperKey::from_record(record) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping catalog entry on {} with bad url: {}", label, e);
                    plan.invalid += 1;
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                debug!("Duplicate catalog entry {} on {}", key, label);
                plan.duplicates += 1;
                continue;
            }
            match existing.get(&key) {
                Some(entry) if entry.is_done() => {
                    plan.already_done += 1;
                    continue;
                }
                Some(_) => plan.retrying += 1,
                None => {}
            }
            let mut record = record.clone();
            record.url = key.as_str().to_string();
            plan.items.push(WorkItem { key, record });
        }
    }

    plan.unique = seen.len();
    plan
}
