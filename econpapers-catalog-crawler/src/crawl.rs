use std::path::Path;

use econpapers_common::{
    http::PageSource,
    records::page_label,
    retry::{RetryError, RetryPolicy, SleepRange},
    store, CatalogRecord, CatalogStore, Error, PaperKey, Result,
};
use indicatif::ProgressBar;
use log::{debug, info};
use url::Url;

use crate::listing::parse_listing;

/// Search query for one topical filter on the catalog.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub base_url: String,
    pub jel: String,
    pub per_page: u32,
}

impl CatalogQuery {
    pub fn page_url(&self, page: u32) -> Result<String> {
        let per_page = self.per_page.to_string();
        let mut url = Url::parse_with_params(
            &self.base_url,
            &[("jel", self.jel.as_str()), ("ni", ""), ("inpage", per_page.as_str())],
        )
        .map_err(|source| Error::InvalidUrl {
            href: self.base_url.clone(),
            source,
        })?;
        if page > 1 {
            url.query_pairs_mut().append_pair("pg", &page.to_string());
        }
        Ok(url.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub page: u32,
    pub records: Vec<CatalogRecord>,
}

/// Lazy walk over numbered result pages. Yields one page per `next()` and
/// ends on the first empty page, at the page bound, or after a page that
/// could not be fetched (which is yielded as an error).
pub struct CatalogPages<'a, S: PageSource + ?Sized> {
    source: &'a S,
    query: CatalogQuery,
    retry: RetryPolicy,
    pacing: SleepRange,
    start_page: u32,
    next_page: u32,
    max_pages: Option<u32>,
    announced_pages: Option<u32>,
    requests_made: u32,
    finished: bool,
}

impl<'a, S: PageSource + ?Sized> CatalogPages<'a, S> {
    pub fn new(
        source: &'a S,
        query: CatalogQuery,
        start_page: u32,
        max_pages: Option<u32>,
        retry: RetryPolicy,
        pacing: SleepRange,
    ) -> Self {
        let start_page = start_page.max(1);
        CatalogPages {
            source,
            query,
            retry,
            pacing,
            start_page,
            next_page: start_page,
            max_pages,
            announced_pages: None,
            requests_made: 0,
            finished: false,
        }
    }

    /// Last page that may be requested: the configured cap counted from the
    /// start page, or the page count announced by the catalog, whichever is
    /// smaller.
    fn last_page(&self) -> Option<u32> {
        let configured = self
            .max_pages
            .map(|max| self.start_page.saturating_add(max).saturating_sub(1));
        match (configured, self.announced_pages) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fetch(&mut self, page: u32) -> Result<CatalogPage> {
        let url = self.query.page_url(page)?;
        if self.requests_made > 0 {
            let pause = self.pacing.sample();
            debug!("Waiting {:.1}s before fetching page {}", pause.as_secs_f64(), page);
            std::thread::sleep(pause);
        }
        self.requests_made += 1;

        let label = format!("catalog page {}", page);
        let html = self
            .retry
            .run(&label, None, |_| self.source.fetch_page(&url))
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => Error::CatalogFetch {
                    page,
                    attempts,
                    source: last,
                },
                RetryError::Cancelled { .. } => unreachable!("catalog fetch has no stop flag"),
            })?;

        let listing = parse_listing(&html);
        if self.announced_pages.is_none() {
            if let Some(total) = listing.total_pages {
                info!("Catalog reports {} result pages.", total);
                self.announced_pages = Some(total);
            }
        }
        Ok(CatalogPage {
            page,
            records: listing.records,
        })
    }
}

impl<S: PageSource + ?Sized> Iterator for CatalogPages<'_, S> {
    type Item = Result<CatalogPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let page = self.next_page;
        if let Some(last) = self.last_page() {
            if page > last {
                info!("Reached page bound ({}), stopping.", last);
                self.finished = true;
                return None;
            }
        }

        match self.fetch(page) {
            Ok(result) if result.records.is_empty() => {
                info!("Page {} has no records, stopping.", page);
                self.finished = true;
                None
            }
            Ok(result) => {
                self.next_page += 1;
                Some(Ok(result))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub pages: u32,
    pub records: usize,
    pub unique_papers: usize,
}

/// Drains `pages` into a fresh catalog store, rewriting `output` after every
/// page so an interrupted crawl keeps each page it finished. The first error
/// aborts the crawl; pages written before it stay on disk.
pub fn crawl_to_file<I>(pages: I, output: &Path, progress: &ProgressBar) -> Result<CrawlSummary>
where
    I: Iterator<Item = Result<CatalogPage>>,
{
    let mut catalog = CatalogStore::new();
    let mut summary = CrawlSummary::default();
    let mut unique = std::collections::HashSet::new();

    for page in pages {
        let CatalogPage { page, records } = page?;
        for record in &records {
            if let Ok(key) = PaperKey::from_record(record) {
                unique.insert(key);
            }
        }
        summary.pages += 1;
        summary.records += records.len();
        progress.set_message(format!("page {}: {} papers", page, records.len()));
        info!("Found {} papers on page {}", records.len(), page);

        catalog.insert(page_label(page), records);
        store::write_json(output, &catalog)?;
        progress.inc(1);
    }

    summary.unique_papers = unique.len();
    Ok(summary)
}
