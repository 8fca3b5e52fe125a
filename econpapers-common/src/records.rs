use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::PaperKey;

/// Page label -> records found on that page, exactly as listed.
pub type CatalogStore = BTreeMap<String, Vec<CatalogRecord>>;
pub type EnrichmentStore = BTreeMap<PaperKey, EnrichedRecord>;
pub type ClassificationStore = BTreeMap<PaperKey, ClassificationVerdict>;

const PAGE_LABEL_PREFIX: &str = "page_";

pub fn page_label(page: u32) -> String {
    format!("{}{}", PAGE_LABEL_PREFIX, page)
}

pub fn page_number(label: &str) -> Option<u32> {
    label.strip_prefix(PAGE_LABEL_PREFIX)?.parse().ok()
}

/// Catalog pages in crawl order. Labels that are not `page_<n>` sort last.
pub fn pages_in_order(catalog: &CatalogStore) -> Vec<(&str, &[CatalogRecord])> {
    let mut pages: Vec<_> = catalog
        .iter()
        .map(|(label, records)| (label.as_str(), records.as_slice()))
        .collect();
    pages.sort_by_key(|(label, _)| (page_number(label).unwrap_or(u32::MAX), label.to_string()));
    pages
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jel_codes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Link as it appears on the page, made absolute.
    pub href: String,
    /// Direct target once any redirect wrapper has been decoded.
    pub url: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Labelled link such as a JEL code or a reference list entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelledLink {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JournalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Full citation line, e.g. "Journal of Finance, 2016, vol. 122, issue 2, 221-247".
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub catalog: CatalogRecord,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub download_links: Vec<DownloadLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parsed_authors: Vec<ParsedAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyword_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_journal_info: Option<JournalInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parsed_jel_codes: Vec<LabelledLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references_links: Vec<LabelledLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_works_search_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering_info: Option<LabelledLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_stats_link: Option<String>,
}

impl EnrichedRecord {
    /// A record with a non-empty abstract is never fetched again.
    pub fn is_done(&self) -> bool {
        self.abstract_text
            .as_deref()
            .map_or(false, |text| !text.trim().is_empty())
    }

    pub fn display_title(&self) -> &str {
        self.parsed_title
            .as_deref()
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.catalog.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub strategy: bool,
    pub reason: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub eco_link: String,
    pub reviewed_by: String,
}
