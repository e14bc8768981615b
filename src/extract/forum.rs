use scraper::{Html, Selector};
use serde_json::Value;

use super::{parse_selector, ExtractError, Extractor, Item};
use crate::crawler::request::Page;

/// Extracts threads and posts from IPB-style forum pages.
///
/// Thread links are `<a id="tid-link-N">title</a>`, posts are
/// `<td id="post-main-N">`. Keys are `thread:<id>` and `post:<id>`.
pub struct ForumExtractor {
    thread_links: Selector,
    posts: Selector,
}

impl ForumExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            thread_links: parse_selector(r#"a[id^="tid-link-"]"#)?,
            posts: parse_selector(r#"td[id^="post-main-"]"#)?,
        })
    }
}

impl Extractor for ForumExtractor {
    fn extract(&self, page: &Page) -> Result<Vec<Item>, ExtractError> {
        if !page.is_html() {
            return Ok(Vec::new());
        }

        let document = Html::parse_document(&page.body);
        let mut items = Vec::new();

        for link in document.select(&self.thread_links) {
            let thread_id = link.value().attr("id").unwrap_or_default();
            let thread_name = link.text().next().ok_or_else(|| ExtractError::Parse {
                url: page.url.clone(),
                reason: format!("thread link {} has no title", thread_id),
            })?;
            items.push(Item::new(
                format!("thread:{}", thread_id),
                Some(Value::String(thread_name.to_string())),
            ));
        }

        for post in document.select(&self.posts) {
            let post_id = post.value().attr("id").unwrap_or_default();
            items.push(Item::new(format!("post:{}", post_id), None));
        }

        Ok(items)
    }
}
