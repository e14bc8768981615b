use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::crawler::request::Page;

/// Absolute http(s) links of a page, in document order, without duplicates
pub fn extract_links(page: &Page) -> Vec<String> {
    if !page.is_html() {
        return Vec::new();
    }

    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let Ok(base_url) = Url::parse(&page.url) else {
        return Vec::new();
    };

    let document = Html::parse_document(&page.body);
    let mut seen = HashSet::new();

    document
        .select(&selector)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| base_url.join(href.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|mut url| {
            url.set_fragment(None);
            url.to_string()
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
