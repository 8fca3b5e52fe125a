//! Shared building blocks for the EconPapers pipeline tools: record types,
//! identity keys, JSON stores, retry/pacing policy and the HTML page fetcher.

pub mod error;
pub mod http;
pub mod identity;
pub mod logging;
pub mod records;
pub mod retry;
pub mod store;

pub use error::{Error, FetchError, Result};
pub use identity::PaperKey;
pub use records::{
    CatalogRecord, CatalogStore, ClassificationStore, ClassificationVerdict, DownloadLink,
    EnrichedRecord, EnrichmentStore, JournalInfo, LabelledLink, LibraryEntry, ParsedAuthor,
};
pub use reqwest::StatusCode;
