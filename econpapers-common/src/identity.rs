use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::records::CatalogRecord;

pub const ECONPAPERS_ORIGIN: &str = "https://econpapers.repec.org";

/// Canonical record URL. Unique across the enrichment and classification
/// stores; every duplicate and resumability check goes through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperKey(String);

impl PaperKey {
    /// Resolves `href` against `base` and canonicalises the result: surrounding
    /// whitespace and any fragment are dropped, scheme and host are lower-cased.
    pub fn resolve(href: &str, base: &str) -> Result<Self> {
        let invalid = |source| Error::InvalidUrl {
            href: href.to_string(),
            source,
        };
        let base = Url::parse(base).map_err(invalid)?;
        let mut url = base.join(href.trim()).map_err(invalid)?;
        url.set_fragment(None);
        Ok(PaperKey(url.into()))
    }

    /// Canonical key for an href scraped from an EconPapers page.
    pub fn from_href(href: &str) -> Result<Self> {
        Self::resolve(href, ECONPAPERS_ORIGIN)
    }

    /// Key of a catalog record. Records written by the crawler already carry a
    /// canonical url; older files are canonicalised on the way in.
    pub fn from_record(record: &CatalogRecord) -> Result<Self> {
        Self::from_href(&record.url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_href_resolves_against_origin() {
        let key = PaperKey::from_href("/paper/eeedyncon/v_3a19_3ay_3a1995.htm").unwrap();
        assert_eq!(
            key.as_str(),
            "https://econpapers.repec.org/paper/eeedyncon/v_3a19_3ay_3a1995.htm"
        );
    }

    #[test]
    fn fragment_whitespace_and_host_case_are_normalised() {
        let a =
            PaperKey::from_href("  HTTPS://EconPapers.RePEc.org/paper/abc/def.htm#refs ").unwrap();
        let b = PaperKey::from_href("/paper/abc/def.htm").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn path_case_is_preserved() {
        let key = PaperKey::from_href("/paper/ABC/Def.htm").unwrap();
        assert!(key.as_str().ends_with("/paper/ABC/Def.htm"));
    }

    #[test]
    fn unparseable_base_is_an_error() {
        assert!(PaperKey::resolve("/paper/x.htm", "not a url").is_err());
    }
}
