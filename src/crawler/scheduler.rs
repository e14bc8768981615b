use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::crawler::request::CrawlRequest;
use crate::utils::domain::registered_domain;

/// Links per priority step in [`DecreasingPriority`]
const PRIORITY_BLOCK: usize = 5;

/// Scheduler for determining which requests may enter the frontier.
///
/// De-duplication is not done here: it is run-scoped and belongs to
/// [`crate::crawler::filter::RunScopedFilter`].
pub struct Scheduler {
    /// Configuration for the crawler
    config: CrawlerSettings,

    /// Compiled regex patterns for URL inclusion
    include_patterns: Vec<Regex>,

    /// Compiled regex patterns for URL exclusion
    exclude_patterns: Vec<Regex>,

    /// Allowed domains for crawling (if empty, any domain is allowed)
    allowed_domains: HashSet<String>,
}

impl Scheduler {
    /// Create a new scheduler with the given crawler settings
    pub fn new(config: CrawlerSettings) -> Self {
        let include_patterns = compile_patterns(&config.url_patterns.include, "include");
        let exclude_patterns = compile_patterns(&config.url_patterns.exclude, "exclude");

        let allowed_domains = config.allowed_domains.iter()
            .map(|domain| domain.to_lowercase())
            .collect();

        Self {
            config,
            include_patterns,
            exclude_patterns,
            allowed_domains,
        }
    }

    /// Allow the registered domain of `url` (used for seeds when staying in domain)
    pub fn allow_domain_of(&mut self, url: &str) {
        let domain = registered_domain(url);
        if !domain.is_empty() && self.allowed_domains.insert(domain.clone()) {
            debug!("Allowing domain {}", domain);
        }
    }

    /// Determine if a request should be scheduled
    pub fn should_schedule(&self, request: &CrawlRequest) -> bool {
        if request.depth > self.config.max_depth {
            debug!("Skipping URL beyond max depth: {}", request.url);
            return false;
        }

        let parsed_url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping invalid URL {}: {}", request.url, e);
                return false;
            }
        };

        // Check if the URL is in an allowed domain
        if !self.allowed_domains.is_empty() {
            let Some(host) = parsed_url.host_str() else {
                debug!("Skipping URL without host: {}", request.url);
                return false;
            };
            let host = host.to_lowercase();
            if !self.allowed_domains.iter().any(|domain| host == *domain || host.ends_with(&format!(".{}", domain))) {
                debug!("Skipping URL from non-allowed domain: {}", host);
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|pattern| pattern.is_match(&request.url)) {
            debug!("Skipping URL matching exclusion pattern: {}", request.url);
            return false;
        }

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|pattern| pattern.is_match(&request.url))
        {
            debug!("Skipping URL not matching any inclusion pattern: {}", request.url);
            return false;
        }

        true
    }

    /// Turn the links of `parent`'s page into untagged child requests
    pub fn links_to_requests(&self, parent: &CrawlRequest, links: Vec<String>) -> Vec<CrawlRequest> {
        links.into_iter()
            .zip(DecreasingPriority::new(PRIORITY_BLOCK))
            .map(|(link, priority)| CrawlRequest::child(link, parent, parent.priority + priority))
            .collect()
    }
}

fn compile_patterns(patterns: &[String], kind: &str) -> Vec<Regex> {
    patterns.iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid {} pattern '{}': {}", kind, pattern, e);
                None
            }
        })
        .collect()
}

/// Priorities 0 for the first `block` links, -1 for the next `block`, and so on,
/// so the frontier spreads over many candidates instead of following one page's links
pub struct DecreasingPriority {
    block: usize,
    index: usize,
}

impl DecreasingPriority {
    pub fn new(block: usize) -> Self {
        Self { block: block.max(1), index: 0 }
    }
}

impl Iterator for DecreasingPriority {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        let priority = -((self.index / self.block) as i32);
        self.index += 1;
        Some(priority)
    }
}
