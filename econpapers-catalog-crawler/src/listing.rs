use std::sync::OnceLock;

use econpapers_common::{CatalogRecord, PaperKey};
use log::warn;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Records extracted from one search-result page.
#[derive(Debug, Default)]
pub struct ListingPage {
    pub records: Vec<CatalogRecord>,
    /// "page X of N" as announced by the page itself.
    pub total_pages: Option<u32>,
}

struct SmallPatterns {
    institution: Regex,
    year: Regex,
    keywords: Regex,
    jel_codes: Regex,
    created: Regex,
    modified: Regex,
    page_count: Regex,
}

fn patterns() -> &'static SmallPatterns {
    static PATTERNS: OnceLock<SmallPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| SmallPatterns {
        institution: Regex::new(r"(?s)from\s+<i>(.*?)</i>").expect("institution pattern"),
        year: Regex::new(r"\((\d{4})\)").expect("year pattern"),
        keywords: Regex::new(r"(?s)<b>Keywords:</b>(.*?)<br").expect("keywords pattern"),
        jel_codes: Regex::new(r"(?s)<b>JEL-codes:</b>(.*?)<br").expect("jel pattern"),
        created: Regex::new(r"<b>Created/Revised:</b>\s*([\d-]+)").expect("created pattern"),
        modified: Regex::new(r"<b>Added/Modified:</b>\s*([\d-]+)").expect("modified pattern"),
        page_count: Regex::new(r"page \d+ of (\d+)").expect("page count pattern"),
    })
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of an HTML fragment with tags removed and entities decoded.
fn fragment_text(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    collapse_whitespace(&parsed.root_element().text().collect::<String>())
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| fragment_text(m.as_str()))
        .filter(|s| !s.is_empty())
}

pub fn parse_listing(html: &str) -> ListingPage {
    let document = Html::parse_document(html);
    let li_selector = selector("li");
    let link_selector = selector("a[href]");
    let italic_selector = selector("i");
    let small_selector = selector("small");
    let p = patterns();

    let mut records = Vec::new();
    for item in document.select(&li_selector) {
        let Some(link) = item
            .select(&link_selector)
            .find(|a| a.value().attr("href").map_or(false, |h| h.contains("/paper/")))
        else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        let url = match PaperKey::from_href(href) {
            Ok(key) => key.as_str().to_string(),
            Err(e) => {
                warn!("Skipping listing entry with bad link: {}", e);
                continue;
            }
        };

        let mut record = CatalogRecord {
            title: element_text(&link),
            url,
            authors: item
                .select(&italic_selector)
                .next()
                .map(|i| element_text(&i))
                .filter(|s| !s.is_empty()),
            ..Default::default()
        };

        if let Some(small) = item.select(&small_selector).next() {
            let small_html = small.inner_html();
            record.institution = capture(&p.institution, &small_html);
            record.year = capture(&p.year, &small_html);
            record.keywords = capture(&p.keywords, &small_html);
            record.jel_codes = capture(&p.jel_codes, &small_html);
            record.created_date = capture(&p.created, &small_html);
            record.modified_date = capture(&p.modified, &small_html);
        }
        records.push(record);
    }

    let page_text = document.root_element().text().collect::<String>();
    let total_pages = p
        .page_count
        .captures(&page_text)
        .and_then(|caps| caps[1].parse().ok());

    ListingPage {
        records,
        total_pages,
    }
}
