//! Direct children of an HTML directory index.

use scraper::{Html, Selector};
use url::Url;

use crate::url_model::name_from_url;

/// Link to a direct child of an index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub url: Url,
    pub name: String,
    pub collection: bool,
}

/// `href` values of the page's `<a>` elements, in document order.
/// Comments, scripts and other attributes never contribute links.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let hrefs = document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
        .collect();
    hrefs
}

/// The index URL with its path ending in `/`, so relative links resolve
/// inside the directory.
pub fn directory_url(url: &Url) -> Url {
    let mut dir = url.clone();
    dir.set_query(None);
    dir.set_fragment(None);
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

/// Resolves `hrefs` against the index at `url` and keeps the ones naming a
/// direct child on the same origin.
pub fn child_entries(url: &Url, hrefs: &[String]) -> Vec<IndexEntry> {
    let dir = directory_url(url);
    let mut out: Vec<IndexEntry> = Vec::new();
    for href in hrefs {
        let Ok(target) = dir.join(href) else {
            continue;
        };
        if target.scheme() != dir.scheme()
            || target.host_str() != dir.host_str()
            || target.port() != dir.port()
            || target.query().is_some()
        {
            continue;
        }
        let Some(rest) = target.path().strip_prefix(dir.path()) else {
            continue;
        };
        let collection = rest.ends_with('/');
        let segment = rest.trim_end_matches('/');
        if segment.is_empty() || segment.contains('/') {
            continue;
        }
        let mut target = target;
        target.set_fragment(None);
        if out.iter().any(|e| e.url == target) {
            continue;
        }
        out.push(IndexEntry {
            name: name_from_url(&target),
            url: target,
            collection,
        });
    }
    out
}
