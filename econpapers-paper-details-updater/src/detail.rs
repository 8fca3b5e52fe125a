use std::sync::OnceLock;

use econpapers_common::{
    identity::ECONPAPERS_ORIGIN, CatalogRecord, DownloadLink, EnrichedRecord, JournalInfo,
    LabelledLink, PaperKey, ParsedAuthor,
};
use log::debug;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Fields scraped from one paper detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperDetails {
    pub title: Option<String>,
    pub authors: Vec<ParsedAuthor>,
    pub abstract_text: Option<String>,
    pub download_links: Vec<DownloadLink>,
    pub keyword_terms: Vec<String>,
    pub publication_date: Option<String>,
    pub citation_count: Option<u32>,
    pub persistent_link: Option<String>,
    pub journal: Option<JournalInfo>,
    pub jel_codes: Vec<LabelledLink>,
    pub references: Vec<LabelledLink>,
    pub related_works_search_link: Option<String>,
    pub ordering_info: Option<LabelledLink>,
    pub access_stats_link: Option<String>,
}

impl PaperDetails {
    pub fn into_record(self, catalog: CatalogRecord) -> EnrichedRecord {
        EnrichedRecord {
            catalog,
            abstract_text: self.abstract_text,
            download_links: self.download_links,
            parsed_title: self.title,
            parsed_authors: self.authors,
            keyword_terms: self.keyword_terms,
            publication_date: self.publication_date,
            citation_count: self.citation_count,
            persistent_link: self.persistent_link,
            parsed_journal_info: self.journal,
            parsed_jel_codes: self.jel_codes,
            references_links: self.references,
            related_works_search_link: self.related_works_search_link,
            ordering_info: self.ordering_info,
            access_stats_link: self.access_stats_link,
        }
    }
}

struct DetailPatterns {
    section_marker: Regex,
    redirect_target: Regex,
    mime_type: Regex,
    access_note: Regex,
    count: Regex,
}

fn patterns() -> &'static DetailPatterns {
    static PATTERNS: OnceLock<DetailPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DetailPatterns {
        section_marker: Regex::new(
            r"(?i)\b(?:Keywords|JEL-codes|Date|New Economics Papers|References|Citations|Downloads|Related works|Export reference|Persistent link|Ordering information|Access Statistics)\s*:|\bMore (?:papers|articles) in\b|\(search for similar items in EconPapers\)|\bBibliographic data for series\b",
        )
        .expect("section marker pattern"),
        redirect_target: Regex::new(r"[?&;]u=([^;&]+)").expect("redirect pattern"),
        mime_type: Regex::new(r"\(((?:application|text)/[^)\s]+)\)").expect("mime pattern"),
        access_note: Regex::new(r"(?i)subscribers only|subscription").expect("access pattern"),
        count: Regex::new(r"\((\d+)\)").expect("count pattern"),
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

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn absolute(href: &str) -> Option<String> {
    PaperKey::resolve(href, ECONPAPERS_ORIGIN)
        .ok()
        .map(|key| key.as_str().to_string())
}

// Bold text inside an abstract is emphasis, not a section boundary.
fn is_section_label(element: &ElementRef) -> bool {
    if element.value().name() != "b" {
        return false;
    }
    let text = element_text(element);
    text.to_lowercase().starts_with("abstract") || patterns().section_marker.is_match(&text)
}

/// Sibling content following a `<b>Label:</b>` up to the next label.
enum Segment<'a> {
    Text(&'a str),
    Element(ElementRef<'a>),
}

fn section_after<'a>(label: ElementRef<'a>) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    for node in label.next_siblings() {
        if let Some(element) = ElementRef::wrap(node) {
            if is_section_label(&element) {
                break;
            }
            segments.push(Segment::Element(element));
        } else if let Some(text) = node.value().as_text() {
            segments.push(Segment::Text(&**text));
        }
    }
    segments
}

fn segments_text(segments: &[Segment]) -> String {
    let mut text = String::new();
    for segment in segments {
        match segment {
            Segment::Text(t) => text.push_str(t),
            Segment::Element(e) if e.value().name() == "br" => text.push(' '),
            Segment::Element(e) => text.extend(e.text()),
        }
    }
    collapse_whitespace(&text)
}

fn segment_links<'a>(segments: &[Segment<'a>]) -> Vec<ElementRef<'a>> {
    let link_selector = selector("a[href]");
    let mut links = Vec::new();
    for segment in segments {
        if let Segment::Element(e) = segment {
            if e.value().name() == "a" && e.value().attr("href").is_some() {
                links.push(*e);
            } else {
                links.extend(e.select(&link_selector));
            }
        }
    }
    links
}

/// Collapses whitespace and cuts the abstract at the first trailing section
/// marker that leaked into the same block.
pub fn clean_abstract(raw: &str) -> Option<String> {
    let text = collapse_whitespace(raw);
    let text = match patterns().section_marker.find(&text) {
        Some(marker) => text[..marker.start()].trim_end().to_string(),
        None => text,
    };
    non_empty(text)
}

/// Direct target of an EconPapers `redir.pf?u=<encoded>;h=...` link. Links
/// that are not redirects come back unchanged.
pub fn decode_redirect(href: &str) -> String {
    patterns()
        .redirect_target
        .captures(href)
        .and_then(|caps| urlencoding::decode(&caps[1]).ok().map(|s| s.into_owned()))
        .unwrap_or_else(|| href.to_string())
}

fn file_type_from_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    let mime = if path.ends_with(".pdf") {
        "application/pdf"
    } else if path.ends_with(".doc") || path.ends_with(".docx") {
        "application/msword"
    } else if path.ends_with(".html") || path.ends_with(".htm") {
        "text/html"
    } else {
        return None;
    };
    Some(mime.to_string())
}

fn download_links(segments: &[Segment]) -> Vec<DownloadLink> {
    let p = patterns();
    let mut links = Vec::new();
    for link in segment_links(segments) {
        let text = element_text(&link);
        let Some(href) = link.value().attr("href").and_then(absolute) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        let url = decode_redirect(&href);

        // Notes such as "(application/pdf)" trail the link up to the next one.
        let mut trailing = String::new();
        for node in link.next_siblings() {
            if let Some(element) = ElementRef::wrap(node) {
                if element.value().name() == "a" || is_section_label(&element) {
                    break;
                }
                trailing.push(' ');
                trailing.extend(element.text());
            } else if let Some(t) = node.value().as_text() {
                trailing.push_str(t);
            }
        }

        let file_type = p
            .mime_type
            .captures(&trailing)
            .map(|caps| caps[1].to_string())
            .or_else(|| file_type_from_extension(&url));
        let access_info = p
            .access_note
            .find(&trailing)
            .map(|m| m.as_str().to_lowercase());

        links.push(DownloadLink {
            href,
            url,
            text,
            file_type,
            access_info,
        });
    }
    links
}

fn parse_authors(paragraph: ElementRef) -> Vec<ParsedAuthor> {
    let mut authors = Vec::new();
    for italic in paragraph.select(&selector("i")) {
        let name = element_text(&italic);
        if name.is_empty() {
            continue;
        }
        let email = italic
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take_while(|e| e.value().name() != "i")
            .filter(|e| e.value().name() == "a")
            .find_map(|a| a.value().attr("href")?.strip_prefix("mailto:").map(str::to_string))
            .filter(|email| !email.is_empty());
        authors.push(ParsedAuthor { name, email });
    }
    authors
}

fn labelled_links(segments: &[Segment]) -> Vec<LabelledLink> {
    segment_links(segments)
        .iter()
        .filter_map(|a| {
            let text = element_text(a);
            let url = a.value().attr("href").and_then(absolute);
            (!text.is_empty() || url.is_some()).then_some(LabelledLink { text, url })
        })
        .collect()
}

/// Journal citation line: the paragraph holding an italic `/article/` link,
/// or failing that the second paragraph when it has both an italic and a link.
fn journal_info(body: ElementRef) -> Option<JournalInfo> {
    let article_link = selector(r#"i a[href*="/article/"]"#);
    let paragraphs: Vec<ElementRef> = body
        .select(&selector("p"))
        .filter(|p| p.select(&selector("b")).next().is_none())
        .take(3)
        .collect();
    let paragraph = paragraphs
        .iter()
        .find(|p| p.select(&article_link).next().is_some())
        .or_else(|| {
            paragraphs.get(1).filter(|p| {
                p.select(&selector("i")).next().is_some()
                    && p.select(&selector("a")).next().is_some()
            })
        })?;

    let link = paragraph.select(&selector(r#"a[href*="/article/"]"#)).next();
    Some(JournalInfo {
        name: link.map(|a| element_text(&a)).and_then(non_empty),
        details: element_text(paragraph),
        url: link.and_then(|a| a.value().attr("href")).and_then(absolute),
    })
}

/// Drops a keyword list that leaked onto the end of the abstract, i.e. a
/// tail after the last sentence made up only of the page's keyword terms.
pub fn trim_keyword_tail(abstract_text: &str, terms: &[String]) -> String {
    let lowered = abstract_text.to_lowercase();
    let ends_with_term = terms
        .iter()
        .any(|term| !term.is_empty() && lowered.ends_with(&term.to_lowercase()));
    if !ends_with_term {
        return abstract_text.to_string();
    }
    let Some(cut) = abstract_text.rfind(['.', '?', '!']).map(|i| i + 1) else {
        return abstract_text.to_string();
    };
    let tail_is_keywords = abstract_text[cut..]
        .split([',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .all(|t| terms.iter().any(|term| term.eq_ignore_ascii_case(t)));
    if tail_is_keywords {
        debug!("Trimmed keyword tail from abstract: {}", abstract_text[cut..].trim());
        abstract_text[..cut].trim_end().to_string()
    } else {
        abstract_text.to_string()
    }
}

/// Parses a paper detail page. The only hard requirement is the
/// `div.bodytext` content block; every field inside it is optional.
pub fn parse_detail(html: &str) -> Result<PaperDetails, String> {
    let document = Html::parse_document(html);
    let body = document
        .select(&selector("div.bodytext"))
        .find(|div| !element_text(div).is_empty())
        .ok_or_else(|| "page has no bodytext content block".to_string())?;

    let mut details = PaperDetails::default();

    let title = body.select(&selector("h1.colored")).next();
    details.title = title.map(|h| element_text(&h)).and_then(non_empty);

    let paragraph_selector = selector("p");
    let italic_selector = selector("i");
    let author_paragraph = title
        .and_then(|h| {
            h.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "p")
        })
        .or_else(|| body.select(&paragraph_selector).next())
        .filter(|p| p.select(&italic_selector).next().is_some());
    if let Some(paragraph) = author_paragraph {
        details.authors = parse_authors(paragraph);
    }

    for label in body.select(&selector("b")).filter(is_section_label) {
        let name = element_text(&label).to_lowercase();
        let section = section_after(label);
        match name.trim_end_matches(':').trim() {
            "abstract" if details.abstract_text.is_none() => {
                details.abstract_text = clean_abstract(&segments_text(&section));
            }
            "downloads" => details.download_links.extend(download_links(&section)),
            "keywords" => {
                details.keyword_terms = segment_links(&section)
                    .iter()
                    .map(element_text)
                    .filter(|term| !term.is_empty())
                    .collect();
            }
            "date" => details.publication_date = non_empty(segments_text(&section)),
            "citations" => {
                details.citation_count = patterns()
                    .count
                    .captures(&segments_text(&section))
                    .and_then(|caps| caps[1].parse().ok());
            }
            "persistent link" => {
                details.persistent_link = segment_links(&section)
                    .first()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(absolute);
            }
            "jel-codes" => details.jel_codes = labelled_links(&section),
            "references" => details.references = labelled_links(&section),
            "related works" => {
                details.related_works_search_link = segment_links(&section)
                    .iter()
                    .filter_map(|a| a.value().attr("href"))
                    .find(|href| href.contains("search.pf"))
                    .and_then(absolute);
            }
            "ordering information" => {
                let text = segments_text(&section);
                let url = segment_links(&section)
                    .first()
                    .and_then(|a| a.value().attr("href"))
                    .and_then(absolute);
                if !text.is_empty() || url.is_some() {
                    details.ordering_info = Some(LabelledLink { text, url });
                }
            }
            _ => {}
        }
    }

    details.journal = journal_info(body);
    details.access_stats_link = body
        .select(&selector(r#"a[href*="logec.repec.org"]"#))
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(absolute);

    if details.abstract_text.is_none() {
        details.abstract_text = body
            .select(&selector(r#"[class*="abstract"]"#))
            .next()
            .and_then(|block| clean_abstract(&block.text().collect::<String>()));
    }
    details.abstract_text = details
        .abstract_text
        .map(|text| trim_keyword_tail(&text, &details.keyword_terms))
        .and_then(non_empty);

    Ok(details)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const DETAIL_PAGE: &str = r#"
<html><body><table><tr><td valign="top"><div class="bodytext">
<h1 class="colored">Momentum Crashes</h1>
<p><i>Kent Daniel</i> <a href="mailto:kd@columbia.edu">kd@columbia.edu</a> and <i>Tobias Moskowitz</i></p>
<p><b>Abstract:</b> Despite their strong positive average returns,
   momentum strategies experience infrequent and persistent strings of negative returns.
   Keywords: this tail is navigation</p>
<p><b>Date:</b> 2013<br><b>New Economics Papers:</b> this-nep-fin<br>
<b>Citations:</b> <a href="/scripts/showcites.pf?h=repec:nbr:nberwo:18918">View citations in EconPapers (26)</a><br>
<b>Downloads:</b> (external link)<br>
<a href="/scripts/redir.pf?u=http%3A%2F%2Fwww.nber.org%2Fpapers%2Fw18918.pdf;h=repec:nbr:nberwo:18918">http://www.nber.org/papers/w18918.pdf</a> (application/pdf)<br>
<a href="https://www.sciencedirect.com/science/article/pii/S0304405X16301490">Full text</a> Full text for ScienceDirect subscribers only<br>
</p>
<p><b>Keywords:</b> <a href="/scripts/search.pf?kwp=momentum">momentum</a>; <a href="/scripts/search.pf?kwp=crash">crash risk</a></p>
<p><b>Persistent link:</b> <a href="https://EconPapers.repec.org/RePEc:nbr:nberwo:18918">https://EconPapers.repec.org/RePEc:nbr:nberwo:18918</a></p>
</div></td></tr></table></body></html>"#;

    #[test]
    fn parses_all_sections_of_a_detail_page() {
        let d = parse_detail(DETAIL_PAGE).unwrap();
        assert_eq!(d.title.as_deref(), Some("Momentum Crashes"));
        assert_eq!(
            d.authors,
            vec![
                ParsedAuthor {
                    name: "Kent Daniel".into(),
                    email: Some("kd@columbia.edu".into())
                },
                ParsedAuthor {
                    name: "Tobias Moskowitz".into(),
                    email: None
                },
            ]
        );
        assert_eq!(
            d.abstract_text.as_deref(),
            Some(
                "Despite their strong positive average returns, momentum strategies experience \
                 infrequent and persistent strings of negative returns."
            )
        );
        assert_eq!(d.publication_date.as_deref(), Some("2013"));
        assert_eq!(d.citation_count, Some(26));
        assert_eq!(d.keyword_terms, vec!["momentum", "crash risk"]);
        assert_eq!(
            d.persistent_link.as_deref(),
            Some("https://econpapers.repec.org/RePEc:nbr:nberwo:18918")
        );
    }

    #[test]
    fn download_links_are_decoded_and_annotated() {
        let d = parse_detail(DETAIL_PAGE).unwrap();
        assert_eq!(d.download_links.len(), 2);

        let nber = &d.download_links[0];
        assert!(nber.href.starts_with("https://econpapers.repec.org/scripts/redir.pf?u="));
        assert_eq!(nber.url, "http://www.nber.org/papers/w18918.pdf");
        assert_eq!(nber.file_type.as_deref(), Some("application/pdf"));
        assert_eq!(nber.access_info, None);

        let elsevier = &d.download_links[1];
        assert_eq!(elsevier.text, "Full text");
        assert_eq!(elsevier.url, elsevier.href);
        assert_eq!(elsevier.file_type, None);
        assert_eq!(elsevier.access_info.as_deref(), Some("subscribers only"));
    }

    #[test]
    fn page_without_content_block_is_a_parse_error() {
        assert!(parse_detail("<html><body><p>Too many requests</p></body></html>").is_err());
        assert!(parse_detail(r#"<div class="bodytext">   </div>"#).is_err());
    }

    #[test]
    fn missing_abstract_is_not_an_error() {
        let d = parse_detail(r#"<div class="bodytext"><h1 class="colored">Only a title</h1></div>"#)
            .unwrap();
        assert_eq!(d.title.as_deref(), Some("Only a title"));
        assert!(d.abstract_text.is_none());
        assert!(d.download_links.is_empty());
    }

    #[test]
    fn abstract_block_class_is_a_fallback() {
        let d = parse_detail(
            r#"<div class="bodytext"><div class="abstract-text">We study  returns.</div></div>"#,
        )
        .unwrap();
        assert_eq!(d.abstract_text.as_deref(), Some("We study returns."));
    }

    #[test]
    fn clean_abstract_cuts_at_markers_but_not_inside_words() {
        assert_eq!(
            clean_abstract("An update: prices adjust. JEL-codes: G14").as_deref(),
            Some("An update: prices adjust.")
        );
        assert_eq!(clean_abstract("  \n "), None);
        assert_eq!(clean_abstract("Downloads: (external link)"), None);
    }

    #[test]
    fn redirect_wrapper_is_percent_decoded() {
        assert_eq!(
            decode_redirect("https://econpapers.repec.org/scripts/redir.pf?u=https%3A%2F%2Fdoi.org%2F10.1%2Fx;h=repec:x"),
            "https://doi.org/10.1/x"
        );
        assert_eq!(decode_redirect("https://example.org/a.pdf"), "https://example.org/a.pdf");
    }

    const ARTICLE_PAGE: &str = r#"
<div class="bodytext">
<h1 class="colored">Time Series Momentum</h1>
<p><i>Tobias Moskowitz</i>, <i>Yao Hua Ooi</i> and <i>Lasse Pedersen</i></p>
<p><i><a href="/article/eeejfinec/">Journal of Financial Economics</a></i>, 2012, vol. 104, issue 2, 228-250</p>
<p><b>Abstract:</b> We document <b>significant</b> time series momentum in equity index,
   currency, commodity, and bond futures. momentum; futures</p>
<p><b>Keywords:</b> <a href="/scripts/search.pf?kwp=momentum">momentum</a>; <a href="/scripts/search.pf?kwp=futures">futures</a><br>
<b>JEL-codes:</b> <a href="/scripts/search.pf?jel=G12">G12</a> <a href="/scripts/search.pf?jel=G13">G13</a><br>
<b>References:</b> <a href="http://citec.repec.org/rvr/abc">View references in EconPapers</a><br>
<b>Related works:</b> <a href="/scripts/search.pf?ft=time+series+momentum">Search for similar works</a><br>
<b>Ordering information:</b> <a href="http://www.elsevier.com/wps/find/journaldescription.cws_home/505576/bibliographic">Order</a> from Elsevier</p>
<p><a href="http://logec.repec.org/RePEc/eee/jfinec/v104y2012i2p228-250.htm">Access Statistics for this article</a></p>
</div>"#;

    #[test]
    fn bold_words_inside_the_abstract_do_not_end_it() {
        let d = parse_detail(
            r#"<div class="bodytext"><p><b>Abstract:</b> We show that <b>momentum</b> strategies earn abnormal returns after costs.</p></div>"#,
        )
        .unwrap();
        assert_eq!(
            d.abstract_text.as_deref(),
            Some("We show that momentum strategies earn abnormal returns after costs.")
        );
    }

    #[test]
    fn journal_codes_and_reference_sections_are_extracted() {
        let d = parse_detail(ARTICLE_PAGE).unwrap();
        assert_eq!(d.authors.len(), 3);

        let journal = d.journal.expect("journal paragraph");
        assert_eq!(journal.name.as_deref(), Some("Journal of Financial Economics"));
        assert_eq!(
            journal.details,
            "Journal of Financial Economics, 2012, vol. 104, issue 2, 228-250"
        );
        assert_eq!(journal.url.as_deref(), Some("https://econpapers.repec.org/article/eeejfinec/"));

        let codes: Vec<&str> = d.jel_codes.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(codes, vec!["G12", "G13"]);
        assert_eq!(
            d.jel_codes[0].url.as_deref(),
            Some("https://econpapers.repec.org/scripts/search.pf?jel=G12")
        );
        assert_eq!(d.references.len(), 1);
        assert_eq!(d.references[0].url.as_deref(), Some("http://citec.repec.org/rvr/abc"));
        assert_eq!(
            d.related_works_search_link.as_deref(),
            Some("https://econpapers.repec.org/scripts/search.pf?ft=time+series+momentum")
        );
        let ordering = d.ordering_info.expect("ordering information");
        assert_eq!(ordering.text, "Order from Elsevier");
        assert!(ordering.url.unwrap().contains("elsevier.com"));
        assert_eq!(
            d.access_stats_link.as_deref(),
            Some("http://logec.repec.org/RePEc/eee/jfinec/v104y2012i2p228-250.htm")
        );
    }

    #[test]
    fn keyword_list_leaking_onto_the_abstract_is_trimmed() {
        let d = parse_detail(ARTICLE_PAGE).unwrap();
        assert_eq!(
            d.abstract_text.as_deref(),
            Some(
                "We document significant time series momentum in equity index, currency, \
                 commodity, and bond futures."
            )
        );

        let terms = vec!["momentum".to_string()];
        assert_eq!(
            trim_keyword_tail("Prices drift after news about momentum", &terms),
            "Prices drift after news about momentum"
        );
        assert_eq!(trim_keyword_tail("Returns revert. Momentum", &terms), "Returns revert.");
    }
}
