use regex::Regex;
use scraper::{Html, Selector};
use skyscraper::xpath::{self, XpathItemTree};
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{parse_selector, ExtractError, Extractor, Item};
use crate::crawler::request::Page;
use crate::utils::domain::registered_domain;

/// Page check that must pass for a URL match to count as a profile
enum ProfileCheck {
    Css(Selector),
    /// Expression text, checked when the rules are loaded
    XPath(String),
}

fn xpath_error(expression: &str, reason: impl Debug) -> ExtractError {
    ExtractError::XPath {
        expression: expression.to_string(),
        reason: format!("{:?}", reason),
    }
}

/// Whether `expression` selects anything in the page body
fn xpath_matches(page: &Page, expression: &str) -> Result<bool, ExtractError> {
    let document = skyscraper::html::parse(&page.body).map_err(|e| ExtractError::Parse {
        url: page.url.clone(),
        reason: format!("{:?}", e),
    })?;
    let tree = XpathItemTree::from(&document);

    let selected = xpath::parse(expression)
        .map_err(|e| xpath_error(expression, e))?
        .apply(&tree)
        .map_err(|e| xpath_error(expression, e))?;

    Ok(selected.len() > 0)
}

struct ProfileRule {
    url_pattern: Regex,
    check: ProfileCheck,
}

/// Extracts usernames from profile pages.
///
/// Rules come one per line as `url_pattern, username, rule_kind, rule_value`,
/// where `%s` in the pattern marks the username and the rule must select
/// something on the page. The last rule for a registered domain wins.
pub struct ProfileExtractor {
    rules: HashMap<String, ProfileRule>,
}

impl ProfileExtractor {
    /// Load rules from a file
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let contents = fs::read_to_string(path).map_err(|source| ExtractError::Rules {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse rules from text
    pub fn parse(contents: &str) -> Result<Self, ExtractError> {
        let mut rules = HashMap::new();

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.splitn(4, ", ").collect();
            let [pattern, _username, kind, value] = fields.as_slice() else {
                return Err(ExtractError::MalformedRule {
                    line: index + 1,
                    content: line.to_string(),
                });
            };

            let domain = registered_domain(pattern);
            let check = match *kind {
                "css" => ProfileCheck::Css(parse_selector(value)?),
                "xpath" => {
                    xpath::parse(value).map_err(|e| xpath_error(value, e))?;
                    ProfileCheck::XPath(value.to_string())
                }
                other => {
                    return Err(ExtractError::UnsupportedRule {
                        domain,
                        kind: other.to_string(),
                    })
                }
            };

            rules.insert(
                domain,
                ProfileRule {
                    url_pattern: profile_url_regex(pattern)?,
                    check,
                },
            );
        }

        debug!("Loaded {} profile rules", rules.len());

        Ok(Self { rules })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Compile a `%s` URL pattern into a regex anchored at the URL start
fn profile_url_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split("%s")
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("([^/?]+)");
    Regex::new(&format!("^{}", body.trim_end_matches('/')))
}

impl Extractor for ProfileExtractor {
    fn extract(&self, page: &Page) -> Result<Vec<Item>, ExtractError> {
        if !page.is_html() {
            return Ok(Vec::new());
        }

        let domain = registered_domain(&page.url);
        let Some(rule) = self.rules.get(&domain) else {
            return Ok(Vec::new());
        };

        let Some(username) = rule
            .url_pattern
            .captures(&page.url)
            .and_then(|captures| captures.get(1))
        else {
            return Ok(Vec::new());
        };

        match &rule.check {
            ProfileCheck::Css(selector) => {
                let document = Html::parse_document(&page.body);
                if document.select(selector).next().is_none() {
                    return Ok(Vec::new());
                }
            }
            ProfileCheck::XPath(expression) => {
                if !xpath_matches(page, expression)? {
                    return Ok(Vec::new());
                }
            }
        }

        Ok(vec![Item::new(username.as_str(), None)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::request::CrawlRequest;

    const RULES: &str = "\
https://www.example.com/users/%s/, alice, css, .profile-card
https://social.example.org/@%s, bob, xpath, //div[@class=\"bio\"]
";

    fn page(url: &str, body: &str) -> Page {
        Page::new(CrawlRequest::get(url), url, 200, "text/html", body)
    }

    #[test]
    fn test_parse_rules() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();
        assert_eq!(extractor.rule_count(), 2);
    }

    #[test]
    fn test_malformed_rule_line() {
        let err = ProfileExtractor::parse("https://example.com/%s, alice").err().unwrap();
        assert!(matches!(err, ExtractError::MalformedRule { line: 1, .. }));
    }

    #[test]
    fn test_extracts_username_when_selector_matches() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();
        let profile = page(
            "https://www.example.com/users/carol/?tab=posts",
            r#"<div class="profile-card">Carol</div>"#,
        );

        let items = extractor.extract(&profile).unwrap();
        assert_eq!(items, vec![Item::new("carol", None)]);
    }

    #[test]
    fn test_no_username_without_selector_match() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();
        let not_found = page("https://www.example.com/users/ghost", "<p>No such user</p>");

        assert!(extractor.extract(&not_found).unwrap().is_empty());
    }

    #[test]
    fn test_other_pages_yield_nothing() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();

        let listing = page("https://www.example.com/forum", r#"<div class="profile-card"></div>"#);
        assert!(extractor.extract(&listing).unwrap().is_empty());

        let unknown_domain = page("https://unknown.net/users/x", "");
        assert!(extractor.extract(&unknown_domain).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_rule_kind_rejected() {
        let err = ProfileExtractor::parse("https://example.com/%s, alice, json, $.user")
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::UnsupportedRule { .. }));
    }

    #[test]
    fn test_extracts_username_when_xpath_matches() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();
        let profile = page(
            "https://social.example.org/@dave",
            r#"<html><body><div class="bio">Dave writes here</div></body></html>"#,
        );

        let items = extractor.extract(&profile).unwrap();
        assert_eq!(items, vec![Item::new("dave", None)]);
    }

    #[test]
    fn test_no_username_without_xpath_match() {
        let extractor = ProfileExtractor::parse(RULES).unwrap();
        let suspended = page(
            "https://social.example.org/@erin",
            r#"<html><body><div class="notice">Account suspended</div></body></html>"#,
        );

        assert!(extractor.extract(&suspended).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_xpath_rejected_on_load() {
        let err = ProfileExtractor::parse("https://example.com/%s, alice, xpath, ]]")
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::XPath { .. }));
    }
}
